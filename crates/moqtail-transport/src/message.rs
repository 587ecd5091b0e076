//! Control messages exchanged on the session's control stream.
//!
//! Each frame carries one message: a varint message id followed by the
//! message fields in declaration order. Strings are varint-length prefixed
//! UTF-8; [`Location`] is a varint mode plus an optional varint value.

use bytes::{Buf, BufMut};

use crate::{
    coding::{Decode, Encode, decode_varint, encode_varint},
    error::{DecodeError, EncodeError},
};

/// Position bound used by SUBSCRIBE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Location {
    #[default]
    None,
    Absolute(u64),
    /// Relative to the latest group or object.
    Latest(u64),
    /// Relative to the next group or object.
    Future(u64),
}

impl Encode for Location {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        match *self {
            Self::None => encode_varint(0, w),
            Self::Absolute(v) => {
                encode_varint(1, w)?;
                encode_varint(v, w)
            }
            Self::Latest(v) => {
                encode_varint(2, w)?;
                encode_varint(v, w)
            }
            Self::Future(v) => {
                encode_varint(3, w)?;
                encode_varint(v, w)
            }
        }
    }
}

impl Decode for Location {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        match decode_varint(r)? {
            0 => Ok(Self::None),
            1 => Ok(Self::Absolute(decode_varint(r)?)),
            2 => Ok(Self::Latest(decode_varint(r)?)),
            3 => Ok(Self::Future(decode_varint(r)?)),
            mode => Err(DecodeError::InvalidLocation(mode)),
        }
    }
}

impl Encode for u64 {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        encode_varint(*self, w)
    }
}

impl Decode for u64 {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        decode_varint(r)
    }
}

/// Declares the message structs, their field codecs and the [`Message`] enum.
macro_rules! messages {
    ($($(#[$meta:meta])* $name:ident = $id:literal { $($field:ident: $ty:ty),* $(,)? })*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Debug, PartialEq, Eq)]
            pub struct $name {
                $(pub $field: $ty,)*
            }

            impl Encode for $name {
                fn encode<W: BufMut>(&self, _w: &mut W) -> Result<(), EncodeError> {
                    $(self.$field.encode(_w)?;)*
                    Ok(())
                }
            }

            impl Decode for $name {
                fn decode<R: Buf>(_r: &mut R) -> Result<Self, DecodeError> {
                    Ok(Self {
                        $($field: <$ty>::decode(_r)?,)*
                    })
                }
            }

            impl From<$name> for Message {
                fn from(m: $name) -> Self {
                    Self::$name(m)
                }
            }
        )*

        /// Any control message.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Message {
            $($name($name),)*
        }

        impl Message {
            pub fn id(&self) -> u64 {
                match self {
                    $(Self::$name(_) => $id,)*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$name(_) => stringify!($name),)*
                }
            }
        }

        impl Encode for Message {
            fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
                encode_varint(self.id(), w)?;
                match self {
                    $(Self::$name(m) => m.encode(w),)*
                }
            }
        }

        impl Decode for Message {
            fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
                match decode_varint(r)? {
                    $($id => Ok(Self::$name($name::decode(r)?)),)*
                    other => Err(DecodeError::UnknownMessage(other)),
                }
            }
        }
    };
}

messages! {
    /// Request delivery of `namespace/name`.
    Subscribe = 0x3 {
        id: u64,
        namespace: String,
        name: String,
        start_group: Location,
        start_object: Location,
        end_group: Location,
        end_object: Location,
        switch_track_id: u64,
    }
    SubscribeOk = 0x4 { id: u64 }
    SubscribeError = 0x5 { id: u64, code: u64, reason: String }
    Announce = 0x6 { namespace: String }
    AnnounceOk = 0x7 { namespace: String }
    AnnounceError = 0x8 { namespace: String, code: u64, reason: String }
    Unannounce = 0x9 { namespace: String }
    Unsubscribe = 0xa { id: u64 }
    /// Graceful end of a subscription.
    SubscribeFin = 0xb { id: u64 }
    /// Abrupt end of a subscription.
    SubscribeReset = 0xc {
        id: u64,
        code: u64,
        reason: String,
        final_group: u64,
        final_object: u64,
    }
}

/// Messages a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Publisher {
    Announce(Announce),
    Unannounce(Unannounce),
    SubscribeOk(SubscribeOk),
    SubscribeError(SubscribeError),
    SubscribeReset(SubscribeReset),
    SubscribeFin(SubscribeFin),
}

/// Messages a publisher receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscriber {
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    AnnounceOk(AnnounceOk),
    AnnounceError(AnnounceError),
}

/// A message split by the role that handles it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Routed {
    ToSubscriber(Publisher),
    ToPublisher(Subscriber),
}

impl Message {
    pub fn route(self) -> Routed {
        match self {
            Self::Announce(m) => Routed::ToSubscriber(Publisher::Announce(m)),
            Self::Unannounce(m) => Routed::ToSubscriber(Publisher::Unannounce(m)),
            Self::SubscribeOk(m) => Routed::ToSubscriber(Publisher::SubscribeOk(m)),
            Self::SubscribeError(m) => Routed::ToSubscriber(Publisher::SubscribeError(m)),
            Self::SubscribeReset(m) => Routed::ToSubscriber(Publisher::SubscribeReset(m)),
            Self::SubscribeFin(m) => Routed::ToSubscriber(Publisher::SubscribeFin(m)),
            Self::Subscribe(m) => Routed::ToPublisher(Subscriber::Subscribe(m)),
            Self::Unsubscribe(m) => Routed::ToPublisher(Subscriber::Unsubscribe(m)),
            Self::AnnounceOk(m) => Routed::ToPublisher(Subscriber::AnnounceOk(m)),
            Self::AnnounceError(m) => Routed::ToPublisher(Subscriber::AnnounceError(m)),
        }
    }
}
