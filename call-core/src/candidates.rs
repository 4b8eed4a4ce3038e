use proto::CandidateDescriptor;

/// Remote candidates of one session.
///
/// Candidates may overtake the description they belong to. Until a remote
/// description is in place they are queued, afterwards they pass straight
/// through.
#[derive(Debug)]
pub(crate) enum RemoteCandidates {
    Buffering { pending: Vec<CandidateDescriptor> },
    Applying,
}

impl RemoteCandidates {
    pub(crate) fn new() -> Self {
        Self::with_pending(vec![])
    }

    pub(crate) fn with_pending(pending: Vec<CandidateDescriptor>) -> Self {
        RemoteCandidates::Buffering { pending }
    }

    /// Returns the candidate if it can be applied right away.
    pub(crate) fn add(&mut self, candidate: CandidateDescriptor) -> Option<CandidateDescriptor> {
        match self {
            RemoteCandidates::Buffering { pending } => {
                pending.push(candidate);
                None
            }
            RemoteCandidates::Applying => Some(candidate),
        }
    }

    /// Switches to pass-through and hands out the queue in arrival order.
    ///
    /// Calling this again (renegotiation) yields nothing.
    pub(crate) fn remote_description_set(&mut self) -> Vec<CandidateDescriptor> {
        match std::mem::replace(self, RemoteCandidates::Applying) {
            RemoteCandidates::Buffering { pending } => pending,
            RemoteCandidates::Applying => vec![],
        }
    }

    /// Empties the queue without applying it, used when a session is
    /// replaced but its queued candidates remain valid.
    pub(crate) fn take_pending(&mut self) -> Vec<CandidateDescriptor> {
        match self {
            RemoteCandidates::Buffering { pending } => std::mem::take(pending),
            RemoteCandidates::Applying => vec![],
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        match self {
            RemoteCandidates::Buffering { pending } => pending.len(),
            RemoteCandidates::Applying => 0,
        }
    }
}
