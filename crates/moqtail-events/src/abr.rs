use moqtail_abr::AbrReason;

#[derive(Clone, Debug, PartialEq)]
pub enum AbrEvent {
    /// The controller moved the video subscription.
    Switched {
        from: String,
        to: String,
        reason: AbrReason,
    },
    /// Skip threshold reached on `track`.
    Congestion { track: String },
    Toggled { enabled: bool },
}
