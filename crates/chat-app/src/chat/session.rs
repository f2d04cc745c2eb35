use scrolltosco_client::ExchangeId;

/// Lifecycle of the single exchange a chat session may have in flight.
///
/// `Erroring` is transient: it lasts while the failed exchange is torn down and the apology turn
/// is committed, then the session recovers to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Sending(ExchangeId),
    Streaming(ExchangeId),
    Erroring(ExchangeId),
}

/// State transition input for the exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Submit(ExchangeId),
    Open(ExchangeId),
    Chunk(ExchangeId),
    Complete(ExchangeId),
    Fail(ExchangeId),
    Recover,
    Abandon(ExchangeId),
}

/// Rejection reason for illegal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    Busy {
        active: ExchangeId,
    },
    NoActiveExchange,
    ExchangeMismatch {
        active: ExchangeId,
        attempted: ExchangeId,
    },
    InvalidTransition {
        state: &'static str,
        transition: &'static str,
    },
}

pub type TransitionResult = Result<SessionState, TransitionRejection>;

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending(_) => "sending",
            Self::Streaming(_) => "streaming",
            Self::Erroring(_) => "erroring",
        }
    }

    /// True while a request is outstanding or its body is being read.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Sending(_) | Self::Streaming(_))
    }

    pub fn active_exchange(&self) -> Option<ExchangeId> {
        match self {
            Self::Idle => None,
            Self::Sending(id) | Self::Streaming(id) | Self::Erroring(id) => Some(*id),
        }
    }

    /// Returns true when events tagged with `exchange_id` belong to the live exchange.
    pub fn accepts_events_for(&self, exchange_id: ExchangeId) -> bool {
        matches!(self, Self::Sending(active) | Self::Streaming(active) if *active == exchange_id)
    }

    /// Applies one transition; anything outside the table is rejected without changing state.
    pub fn apply(&self, transition: SessionTransition) -> TransitionResult {
        match transition {
            SessionTransition::Submit(id) => self.apply_submit(id),
            SessionTransition::Open(id) => match self {
                Self::Sending(active) => Self::matching(*active, id, Self::Streaming(id)),
                _ => self.reject_idle_or_invalid("open"),
            },
            SessionTransition::Chunk(id) => match self {
                Self::Streaming(active) => Self::matching(*active, id, Self::Streaming(id)),
                _ => self.reject_idle_or_invalid("chunk"),
            },
            SessionTransition::Complete(id) => match self {
                Self::Streaming(active) => Self::matching(*active, id, Self::Idle),
                _ => self.reject_idle_or_invalid("complete"),
            },
            SessionTransition::Fail(id) => match self {
                Self::Sending(active) | Self::Streaming(active) => {
                    Self::matching(*active, id, Self::Erroring(id))
                }
                _ => self.reject_idle_or_invalid("fail"),
            },
            SessionTransition::Recover => match self {
                Self::Erroring(_) => Ok(Self::Idle),
                _ => self.reject_idle_or_invalid("recover"),
            },
            SessionTransition::Abandon(id) => match self {
                Self::Sending(active) | Self::Streaming(active) => {
                    Self::matching(*active, id, Self::Idle)
                }
                _ => self.reject_idle_or_invalid("abandon"),
            },
        }
    }

    fn apply_submit(&self, id: ExchangeId) -> TransitionResult {
        match self {
            Self::Idle => Ok(Self::Sending(id)),
            Self::Sending(active) | Self::Streaming(active) => {
                Err(TransitionRejection::Busy { active: *active })
            }
            Self::Erroring(_) => Err(TransitionRejection::InvalidTransition {
                state: self.name(),
                transition: "submit",
            }),
        }
    }

    fn matching(active: ExchangeId, attempted: ExchangeId, next: Self) -> TransitionResult {
        if active == attempted {
            Ok(next)
        } else {
            Err(TransitionRejection::ExchangeMismatch { active, attempted })
        }
    }

    fn reject_idle_or_invalid(&self, transition: &'static str) -> TransitionResult {
        match self {
            Self::Idle => Err(TransitionRejection::NoActiveExchange),
            _ => Err(TransitionRejection::InvalidTransition {
                state: self.name(),
                transition,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ExchangeId = ExchangeId::new(1);
    const B: ExchangeId = ExchangeId::new(2);

    fn run(start: SessionState, transitions: &[SessionTransition]) -> TransitionResult {
        transitions
            .iter()
            .try_fold(start, |state, transition| state.apply(*transition))
    }

    #[test]
    fn happy_path_returns_to_idle() {
        let end = run(
            SessionState::Idle,
            &[
                SessionTransition::Submit(A),
                SessionTransition::Open(A),
                SessionTransition::Chunk(A),
                SessionTransition::Chunk(A),
                SessionTransition::Complete(A),
            ],
        );
        assert_eq!(end, Ok(SessionState::Idle));
    }

    #[test]
    fn failures_pass_through_erroring() {
        let erroring = run(
            SessionState::Idle,
            &[SessionTransition::Submit(A), SessionTransition::Fail(A)],
        );
        assert_eq!(erroring, Ok(SessionState::Erroring(A)));
        assert_eq!(
            SessionState::Erroring(A).apply(SessionTransition::Recover),
            Ok(SessionState::Idle)
        );

        let mid_stream = run(
            SessionState::Idle,
            &[
                SessionTransition::Submit(A),
                SessionTransition::Open(A),
                SessionTransition::Chunk(A),
                SessionTransition::Fail(A),
            ],
        );
        assert_eq!(mid_stream, Ok(SessionState::Erroring(A)));
    }

    #[test]
    fn submit_while_busy_is_rejected() {
        assert_eq!(
            SessionState::Sending(A).apply(SessionTransition::Submit(B)),
            Err(TransitionRejection::Busy { active: A })
        );
        assert_eq!(
            SessionState::Streaming(A).apply(SessionTransition::Submit(B)),
            Err(TransitionRejection::Busy { active: A })
        );
        assert!(SessionState::Erroring(A)
            .apply(SessionTransition::Submit(B))
            .is_err());
    }

    #[test]
    fn stale_exchange_events_are_rejected() {
        assert_eq!(
            SessionState::Streaming(A).apply(SessionTransition::Chunk(B)),
            Err(TransitionRejection::ExchangeMismatch {
                active: A,
                attempted: B
            })
        );
        assert_eq!(
            SessionState::Idle.apply(SessionTransition::Complete(A)),
            Err(TransitionRejection::NoActiveExchange)
        );
    }

    #[test]
    fn chunks_require_an_opened_response() {
        assert_eq!(
            SessionState::Sending(A).apply(SessionTransition::Chunk(A)),
            Err(TransitionRejection::InvalidTransition {
                state: "sending",
                transition: "chunk"
            })
        );
    }

    #[test]
    fn abandon_is_valid_only_while_busy() {
        assert_eq!(
            SessionState::Sending(A).apply(SessionTransition::Abandon(A)),
            Ok(SessionState::Idle)
        );
        assert_eq!(
            SessionState::Streaming(A).apply(SessionTransition::Abandon(A)),
            Ok(SessionState::Idle)
        );
        assert_eq!(
            SessionState::Idle.apply(SessionTransition::Abandon(A)),
            Err(TransitionRejection::NoActiveExchange)
        );
    }

    #[test]
    fn busy_flag_tracks_in_flight_states() {
        assert!(!SessionState::Idle.is_busy());
        assert!(SessionState::Sending(A).is_busy());
        assert!(SessionState::Streaming(A).is_busy());
        assert!(!SessionState::Erroring(A).is_busy());
        assert!(SessionState::Streaming(A).accepts_events_for(A));
        assert!(!SessionState::Streaming(A).accepts_events_for(B));
    }
}
