//! Cluster membership as seen by one node

use serde::{Deserialize, Serialize};

/// A cluster participant, copied by value across the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub address: String,
    #[serde(rename = "distributedPort")]
    pub coordination_port: u16,
    #[serde(rename = "minecraftPort")]
    pub workload_port: u16,
    pub alive: bool,
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Member {
    /// Base URL of the member's coordination API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.coordination_port)
    }
}

/// Network identity of the local node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentity {
    /// Absent while the node is not part of a cluster
    pub id: Option<String>,
    pub address: String,
    pub coordination_port: u16,
    pub workload_port: u16,
    pub username: Option<String>,
}

impl NodeIdentity {
    pub fn new(address: impl Into<String>, coordination_port: u16, workload_port: u16) -> Self {
        Self {
            id: None,
            address: address.into(),
            coordination_port,
            workload_port,
            username: None,
        }
    }

    /// Assign a fresh cluster-wide unique id
    pub fn regenerate(&mut self) -> &str {
        self.id.insert(uuid::Uuid::new_v4().to_string())
    }

    /// Drop the id and display name on leaving a cluster
    pub fn clear(&mut self) {
        self.id = None;
        self.username = None;
    }

    pub fn to_member(&self, is_primary: bool) -> Member {
        Member {
            id: self.id.clone().unwrap_or_default(),
            address: self.address.clone(),
            coordination_port: self.coordination_port,
            workload_port: self.workload_port,
            alive: true,
            is_primary,
            username: self.username.clone(),
        }
    }
}

/// Ordered member list; the primary is derived on every read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterView {
    members: Vec<Member>,
}

impl ClusterView {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn to_vec(&self) -> Vec<Member> {
        self.members.clone()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    /// The member flagged primary, if any
    pub fn primary(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.is_primary)
    }

    pub fn primary_mut(&mut self) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.is_primary)
    }

    /// Members other than `self_id`
    pub fn others(&self, self_id: &str) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.id != self_id)
            .cloned()
            .collect()
    }

    /// Live members other than `self_id`
    pub fn live_others(&self, self_id: &str) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| m.id != self_id && m.alive)
            .cloned()
            .collect()
    }

    /// Append a member. A member with the same id is replaced in place.
    pub fn push(&mut self, member: Member) {
        if member.is_primary {
            self.clear_primary();
        }
        match self.get_mut(&member.id) {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }

    /// Remove a member by id. Absent ids leave the list untouched.
    pub fn remove(&mut self, id: &str) -> Option<Member> {
        let index = self.members.iter().position(|m| m.id == id)?;
        Some(self.members.remove(index))
    }

    /// Replace the whole list with an authoritative copy
    pub fn replace(&mut self, members: Vec<Member>) {
        self.members = members;
        self.enforce_single_primary();
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Demote whoever is primary, then re-insert `member` flagged primary at the end
    pub fn promote(&mut self, mut member: Member) {
        self.clear_primary();
        self.remove(&member.id);
        member.is_primary = true;
        member.alive = true;
        self.members.push(member);
    }

    /// Set the liveness flag of a member; returns true when it changed
    pub fn set_alive(&mut self, id: &str, alive: bool) -> bool {
        match self.get_mut(id) {
            Some(member) if member.alive != alive => {
                member.alive = alive;
                true
            }
            _ => false,
        }
    }

    fn clear_primary(&mut self) {
        for member in &mut self.members {
            member.is_primary = false;
        }
    }

    // A pushed list may be mid-election; keep the last primary flag only
    fn enforce_single_primary(&mut self) {
        let mut seen = false;
        for member in self.members.iter_mut().rev() {
            if member.is_primary {
                if seen {
                    member.is_primary = false;
                }
                seen = true;
            }
        }
    }
}
