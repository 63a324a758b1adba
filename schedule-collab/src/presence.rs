//! Who is online on the topic.
//!
//! The roster is rebuilt from the member list in the attach acknowledgement
//! and kept current from `presence` frames. Members are ordered by when they
//! entered, which is the order the "Who is online" bar lists them in.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::{Member, PresenceAction};

/// Display names a peer picks from when none is configured.
pub const USER_NAMES: &[&str] = &[
    "Austin", "Bennett", "Christopher", "Dominic", "Eddi", "Felix", "Grady", "Henry", "Ivan", "Jack", "Kane",
    "Lambert", "Mickey", "Nolan", "Oliver", "Princeton", "Quentin", "Remi", "Samson", "Thomas", "Urbain", "Vance",
    "Weston", "Xavier", "York", "Zane", "Ariel", "Brinley", "Catarina", "Diana", "Emma", "Fiona", "Gabriella",
    "Harmony", "Isabella", "Jillian", "Katalina", "Lily", "Matilda", "Nadia", "Olivia", "Priscilla", "Quinn", "Renee",
    "Staci", "Trinity", "Ursula", "Victoria", "Wendy", "Xenia", "Yasmine", "Zoe",
];

/// Pick a display name, stable for a given id.
pub fn user_name_for(id: Uuid) -> &'static str {
    USER_NAMES[(id.as_u128() % USER_NAMES.len() as u128) as usize]
}

pub fn random_user_name() -> &'static str {
    user_name_for(Uuid::new_v4())
}

#[derive(Debug, Clone, Default)]
pub struct PresenceRoster {
    members: HashMap<Uuid, (u64, Member)>,
    /// Entry counter used for ordering.
    entered: u64,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with the members reported on attach.
    pub fn reset(&mut self, members: Vec<Member>) {
        self.members.clear();
        for member in members {
            self.enter(member);
        }
    }

    pub fn apply(&mut self, action: PresenceAction, member: Member) {
        match action {
            PresenceAction::Enter => self.enter(member),
            PresenceAction::Leave => {
                if self.members.remove(&member.connection_id).is_none() {
                    log::debug!("Leave for unknown member {}", member.connection_id);
                }
            }
        }
    }

    fn enter(&mut self, member: Member) {
        if self.members.contains_key(&member.connection_id) {
            return;
        }
        self.entered += 1;
        self.members.insert(member.connection_id, (self.entered, member));
    }

    pub fn contains(&self, connection_id: &Uuid) -> bool {
        self.members.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in the order they entered.
    pub fn members(&self) -> Vec<&Member> {
        let mut entries: Vec<_> = self.members.values().collect();
        entries.sort_by_key(|(order, _)| *order);
        entries.into_iter().map(|(_, member)| member).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.members().into_iter().map(|m| m.client_id.as_str()).collect()
    }

    /// `"Who is online: Emma, Zoe"`.
    pub fn label(&self) -> String {
        format!("Who is online: {}", self.names().join(", "))
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_name_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(user_name_for(id), user_name_for(id));
        assert!(USER_NAMES.contains(&random_user_name()));
        assert_eq!(USER_NAMES.len(), 52);
    }

    #[test]
    fn test_roster_enter_leave() {
        let emma = Member::new("Emma");
        let zoe = Member::new("Zoe");
        let mut roster = PresenceRoster::new();

        roster.reset(vec![emma.clone()]);
        roster.apply(PresenceAction::Enter, zoe.clone());
        assert_eq!(roster.names(), vec!["Emma", "Zoe"]);
        assert_eq!(roster.label(), "Who is online: Emma, Zoe");

        roster.apply(PresenceAction::Leave, emma.clone());
        assert_eq!(roster.names(), vec!["Zoe"]);
        assert!(!roster.contains(&emma.connection_id));
    }

    #[test]
    fn test_duplicate_enter_keeps_position() {
        let a = Member::new("Ariel");
        let b = Member::new("Brinley");
        let mut roster = PresenceRoster::new();

        roster.apply(PresenceAction::Enter, a.clone());
        roster.apply(PresenceAction::Enter, b);
        roster.apply(PresenceAction::Enter, a);
        assert_eq!(roster.names(), vec!["Ariel", "Brinley"]);
    }

    #[test]
    fn test_reset_drops_stale_members() {
        let mut roster = PresenceRoster::new();
        roster.apply(PresenceAction::Enter, Member::new("Old"));
        roster.reset(vec![Member::new("New")]);
        assert_eq!(roster.names(), vec!["New"]);

        roster.clear();
        assert!(roster.is_empty());
    }
}
