//! Join-order ranking of room members.

use std::net::SocketAddrV4;

use blocktalk_protocol::PeerIdentity;

/// Room members in the order they joined. The head is the first in line
/// to take over as host.
///
/// The local user is always present exactly once: removals of the local
/// address are refused, and a replacement list that lacks it gets it
/// appended.
#[derive(Debug, Clone)]
pub struct RankOrderList {
    users: Vec<PeerIdentity>,
    local: SocketAddrV4,
}

impl RankOrderList {
    /// A list containing only the local user.
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local: local.addr,
            users: vec![local],
        }
    }

    /// The highest-ranked member.
    pub fn head(&self) -> &PeerIdentity {
        // Never empty: the local user cannot be removed.
        &self.users[0]
    }

    pub fn is_head(&self, addr: SocketAddrV4) -> bool {
        self.head().addr == addr
    }

    /// Appends `user` unless already present. Returns whether it was added.
    pub fn push(&mut self, user: PeerIdentity) -> bool {
        if self.contains(user.addr) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// Removes the member at `addr`. The local user is never removed.
    pub fn remove(&mut self, addr: SocketAddrV4) -> Option<PeerIdentity> {
        if addr == self.local {
            return None;
        }
        let pos = self.users.iter().position(|u| u.addr == addr)?;
        Some(self.users.remove(pos))
    }

    /// Replaces the whole list, dropping duplicates and re-adding the
    /// local user at the end if the new list lacks it.
    pub fn replace_all(&mut self, users: Vec<PeerIdentity>, local: &PeerIdentity) {
        let mut fresh: Vec<PeerIdentity> = Vec::with_capacity(users.len() + 1);
        for user in users {
            if !fresh.contains(&user) {
                fresh.push(user);
            }
        }
        if !fresh.contains(local) {
            fresh.push(local.clone());
        }
        self.users = fresh;
        self.local = local.addr;
    }

    /// Swaps the local entry for `local` (after a self-address update).
    pub fn set_local(&mut self, local: PeerIdentity) {
        let old = self.local;
        self.local = local.addr;
        match self.users.iter().position(|u| u.addr == old) {
            Some(pos) => self.users[pos] = local,
            None => self.users.push(local),
        }
        // The new address might already have been listed separately.
        let mut seen = false;
        let new = self.local;
        self.users.retain(|u| {
            if u.addr != new {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });
    }

    /// Drops everyone but the local user.
    pub fn reset(&mut self) {
        self.users.retain(|u| u.addr == self.local);
    }

    pub fn contains(&self, addr: SocketAddrV4) -> bool {
        self.users.iter().any(|u| u.addr == addr)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerIdentity> {
        self.users.iter()
    }

    pub fn to_vec(&self) -> Vec<PeerIdentity> {
        self.users.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn user(name: &str, port: u16) -> PeerIdentity {
        PeerIdentity::new(name, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_new_contains_only_local() {
        let list = RankOrderList::new(user("me", 1));
        assert_eq!(list.len(), 1);
        assert_eq!(list.head().name, "me");
    }

    #[test]
    fn test_push_rejects_duplicate_address() {
        let mut list = RankOrderList::new(user("me", 1));
        assert!(list.push(user("a", 2)));
        assert!(!list.push(user("a-renamed", 2)));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_remove_local_is_refused() {
        let me = user("me", 1);
        let mut list = RankOrderList::new(me.clone());
        assert_eq!(list.remove(me.addr), None);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_remove_head_promotes_next() {
        let mut list = RankOrderList::new(user("me", 3));
        list.replace_all(vec![user("a", 1), user("b", 2), user("me", 3)], &user("me", 3));
        assert_eq!(list.remove(user("a", 1).addr).map(|u| u.name), Some("a".into()));
        assert_eq!(list.head().name, "b");
    }

    #[test]
    fn test_replace_all_dedupes_and_appends_local() {
        let me = user("me", 9);
        let mut list = RankOrderList::new(me.clone());
        list.replace_all(vec![user("a", 1), user("b", 2), user("a", 1)], &me);
        let names: Vec<_> = list.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "me"]);
    }

    #[test]
    fn test_replace_all_keeps_local_position_when_present() {
        let me = user("me", 2);
        let mut list = RankOrderList::new(me.clone());
        list.replace_all(vec![user("a", 1), user("me", 2), user("c", 3)], &me);
        let names: Vec<_> = list.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["a", "me", "c"]);
    }

    #[test]
    fn test_set_local_replaces_entry_in_place() {
        let mut list = RankOrderList::new(user("me", 1));
        list.push(user("a", 2));
        let moved = PeerIdentity::new("me", SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 1));
        list.set_local(moved.clone());
        assert_eq!(list.len(), 2);
        assert_eq!(list.head(), &moved);
        assert_eq!(list.remove(moved.addr), None);
    }

    #[test]
    fn test_reset_keeps_only_local() {
        let mut list = RankOrderList::new(user("me", 5));
        list.replace_all(vec![user("a", 1), user("b", 2)], &user("me", 5));
        list.reset();
        assert_eq!(list.to_vec(), vec![user("me", 5)]);
    }
}
