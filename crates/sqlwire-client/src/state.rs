//! Connection protocol state.
//!
//! ```text
//! Idle -> AwaitingResponse (command sent)
//! AwaitingResponse -> ProcessingTokens (result bound to the caller)
//! ProcessingTokens -> Idle (final DONE without MORE)
//! AwaitingResponse | ProcessingTokens -> Draining (cancel sent)
//! Draining -> Idle (DONE with ATTN)
//! any -> Poisoned (transport, protocol or TLS failure, or no cancel ack)
//! ```

/// Runtime state of the single request/response slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// Ready for a new command.
    #[default]
    Idle,
    /// Command sent, response not yet read.
    AwaitingResponse,
    /// A result is reading the response.
    ProcessingTokens,
    /// Discarding tokens until the server acknowledges a cancel.
    Draining,
    /// Connection is in a broken state and must be closed.
    Poisoned,
}

impl ProtocolState {
    /// Check if the connection is in a usable state.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Poisoned)
    }

    /// Check if a response is still outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::AwaitingResponse | Self::ProcessingTokens | Self::Draining
        )
    }
}
