//! Vote counting for host elections.
//!
//! When the host disappears, every member votes for the head of the rank
//! list. The head claims the room once it holds votes from at least half
//! of the peers it knows about.

/// Election sub-state of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Election {
    active: bool,
    votes: usize,
}

impl Election {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn votes(&self) -> usize {
        self.votes
    }

    /// Starts an election. Returns `false` if one was already running.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.votes = 0;
        true
    }

    /// Counts one vote and reports whether the threshold is now met.
    pub fn record_vote(&mut self, peer_count: usize) -> bool {
        self.votes += 1;
        threshold_reached(self.votes, peer_count)
    }

    /// Ends the election and clears the tally.
    pub fn end(&mut self) {
        self.active = false;
        self.votes = 0;
    }
}

/// At least half of the known peers have voted.
pub fn threshold_reached(votes: usize, peer_count: usize) -> bool {
    votes > 0 && votes * 2 >= peer_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_twice_returns_false() {
        let mut election = Election::new();
        assert!(election.start());
        assert!(!election.start());
        assert!(election.is_active());
    }

    #[test]
    fn test_record_vote_single_peer_wins_immediately() {
        let mut election = Election::new();
        election.start();
        assert!(election.record_vote(1));
    }

    #[test]
    fn test_record_vote_needs_half_of_peers() {
        let mut election = Election::new();
        election.start();
        assert!(!election.record_vote(4));
        assert!(election.record_vote(4));
        assert_eq!(election.votes(), 2);
    }

    #[test]
    fn test_record_vote_odd_peer_count_rounds_up() {
        let mut election = Election::new();
        election.start();
        assert!(!election.record_vote(5));
        assert!(!election.record_vote(5));
        assert!(election.record_vote(5));
    }

    #[test]
    fn test_end_clears_tally() {
        let mut election = Election::new();
        election.start();
        election.record_vote(10);
        election.end();
        assert!(!election.is_active());
        assert_eq!(election.votes(), 0);
    }

    #[test]
    fn test_threshold_reached_no_votes_never_wins() {
        assert!(!threshold_reached(0, 0));
        assert!(!threshold_reached(0, 2));
    }
}
