/// Resumable session of a shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// id of the current session, none until READY or after invalidation
    pub session_id: Option<String>,
    /// last dispatch sequence received
    pub last_sequence: u64,
    /// url the server asked us to resume on
    pub resume_url: Option<String>,
    /// gateway url discovered from the api, reused across reconnects
    pub gateway_url: Option<String>,
}

impl Session {
    /// Whether the next connection should resume instead of identify
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }

    /// Record a received sequence, ignoring ones that are not newer
    pub fn advance(&mut self, sequence: u64) -> bool {
        if sequence > self.last_sequence {
            self.last_sequence = sequence;
            true
        } else {
            false
        }
    }

    /// Sequence to put in a heartbeat, none before the first dispatch
    pub fn heartbeat_sequence(&self) -> Option<u64> {
        (self.last_sequence > 0).then_some(self.last_sequence)
    }

    /// A new session was established by READY
    pub fn established(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
    }

    /// Forget the session, the next handshake will identify
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.last_sequence = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_session_sequence_only_advances() {
        let mut session = Session::default();
        assert_eq!(session.heartbeat_sequence(), None);

        assert!(session.advance(3));
        assert!(!session.advance(2));
        assert!(!session.advance(3));
        assert_eq!(session.heartbeat_sequence(), Some(3));
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session {
            gateway_url: Some("wss://gateway".to_string()),
            ..Default::default()
        };
        assert!(!session.can_resume());

        session.established("abc".to_string(), Some("wss://resume".to_string()));
        session.advance(10);
        assert!(session.can_resume());

        session.invalidate();
        assert!(!session.can_resume());
        assert_eq!(session.last_sequence, 0);
        assert_eq!(session.resume_url, None);
        assert_eq!(session.gateway_url.as_deref(), Some("wss://gateway"));
    }
}
