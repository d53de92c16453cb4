//! Envelope model: peer identifiers, logical tags, the delivered message
//! envelope, and the sent/received counter pair used by termination
//! detection.

/// Identifies a peer in the communication group. Valid range `[0, size)`.
pub type PeerId = usize;

/// Logical channel of an envelope. Distinct from the transport-level
/// [`CommTag`](crate::comm::CommTag): the engine reserves transport tags,
/// envelope tags are free for the application.
pub type Tag = u16;

/// One logical message plus routing metadata.
///
/// The payload is a borrowed view over a receive buffer and remains valid
/// only for the duration of the on-message callback. Callbacks that need to
/// retain the data must copy it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a, M> {
    /// Message payload, one or more elements.
    pub payload: &'a [M],
    /// Rank that posted the message. For codecs that do not carry a sender
    /// field on the wire this is the origin of the buffer the envelope was
    /// reconstructed from.
    pub sender: PeerId,
    /// Designated final receiver of the message.
    pub receiver: PeerId,
    /// Logical channel.
    pub tag: Tag,
}

impl<'a, M> Envelope<'a, M> {
    /// Envelope on the default channel.
    #[inline]
    pub fn new(payload: &'a [M], sender: PeerId, receiver: PeerId) -> Self {
        Self {
            payload,
            sender,
            receiver,
            tag: 0,
        }
    }
}

/// Monotone counts of wire records that crossed this process boundary.
///
/// `sent` advances when a buffer is handed to the transport (by the number
/// of records the configured merger wrote into it), `received` advances per
/// envelope the splitter reconstructs. Both sides therefore count the same
/// units for every codec family, which is what the termination protocol
/// compares globally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterPair {
    /// Records handed to the transport by this process.
    pub sent: u64,
    /// Envelopes reconstructed from received buffers on this process.
    pub received: u64,
}

impl CounterPair {
    /// True when this process has neither sent nor received anything.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.sent == 0 && self.received == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_defaults_to_channel_zero() {
        let data = [1i32, 2, 3];
        let env = Envelope::new(&data, 0, 2);
        assert_eq!(env.tag, 0);
        assert_eq!(env.payload, &[1, 2, 3]);
        assert_eq!(env.receiver, 2);
    }

    #[test]
    fn counters_start_at_zero() {
        assert!(CounterPair::default().is_zero());
    }
}
