mod abr;
mod playback;
