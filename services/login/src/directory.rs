//! Tracks the set of known peer components: the database, the gateway-manager, and sibling
//! login nodes. Records outlive their channel — a peer can be announced before it connects, or
//! linger after it drops, without losing its address metadata.

use netcode::ChannelId;
use std::collections::HashMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ComponentKind {
    Database,
    GatewayManager,
    Login,
    Gateway,
}

#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub kind: ComponentKind,
    pub component_id: u64,
    pub internal_address: String,
    pub external_address: String,
    pub group_order: u32,
    pub global_order: u32,
    pub channel_id: Option<ChannelId>,
}

/// Directory of known peer components. `Database` and `GatewayManager` are singleton roles —
/// at most one record is kept for each. `Login` peers (including this node) are replicated.
#[derive(Default)]
pub struct ComponentDirectory {
    database: Option<ComponentRecord>,
    gateway_manager: Option<ComponentRecord>,
    gateways: HashMap<u64, ComponentRecord>,
    logins: Vec<ComponentRecord>,
    self_group_order: u32,
}

impl ComponentDirectory {
    pub fn new() -> ComponentDirectory {
        ComponentDirectory::default()
    }

    pub fn set_database(&mut self, record: ComponentRecord) {
        self.database = Some(record);
    }

    /// The database component, if one is both known and currently connected. A record that
    /// persists after its channel dropped (kept around for leader/metadata purposes) is not
    /// "ready" and must not be reported as such.
    pub fn database(&self) -> Option<&ComponentRecord> {
        self.database.as_ref().filter(|r| r.channel_id.is_some())
    }

    pub fn set_gateway_manager(&mut self, record: ComponentRecord) {
        self.gateway_manager = Some(record);
    }

    /// The gateway-manager component, if one is both known and currently connected. See
    /// `database` for why a disconnected-but-persisted record doesn't count.
    pub fn gateway_manager(&self) -> Option<&ComponentRecord> {
        self.gateway_manager.as_ref().filter(|r| r.channel_id.is_some())
    }

    pub fn upsert_gateway(&mut self, record: ComponentRecord) {
        self.gateways.insert(record.component_id, record);
    }

    pub fn gateway(&self, component_id: u64) -> Option<&ComponentRecord> {
        self.gateways.get(&component_id)
    }

    pub fn upsert_login(&mut self, record: ComponentRecord) {
        if let Some(existing) = self.logins.iter_mut().find(|r| r.component_id == record.component_id) {
            *existing = record;
        } else {
            self.logins.push(record);
        }
    }

    /// Records this node's own group order, as announced by the database component on startup.
    pub fn set_self_group_order(&mut self, group_order: u32) {
        self.self_group_order = group_order;
    }

    /// True when this login node is the group leader (`group_order == 1`), uniquely responsible
    /// for hosting the HTTP activation/reset callback surface.
    pub fn is_leader(&self) -> bool {
        self.self_group_order == 1
    }

    /// External host to embed in outgoing activation/reset emails: this node's own address when
    /// it is the leader, otherwise the leader sibling's announced address.
    pub fn http_callback_host(&self, own_external_address: &str) -> Option<String> {
        if self.is_leader() {
            return Some(own_external_address.to_string());
        }

        self.logins
            .iter()
            .find(|r| r.group_order == 1)
            .map(|r| r.external_address.clone())
    }

    pub fn disconnect_channel(&mut self, channel_id: ChannelId) {
        if let Some(record) = &mut self.database {
            if record.channel_id == Some(channel_id) {
                record.channel_id = None;
            }
        }

        if let Some(record) = &mut self.gateway_manager {
            if record.channel_id == Some(channel_id) {
                record.channel_id = None;
            }
        }

        for record in self.gateways.values_mut().chain(self.logins.iter_mut()) {
            if record.channel_id == Some(channel_id) {
                record.channel_id = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ComponentKind, component_id: u64, group_order: u32) -> ComponentRecord {
        ComponentRecord {
            kind,
            component_id,
            internal_address: "10.0.0.1:1000".into(),
            external_address: "game.example.com:1000".into(),
            group_order,
            global_order: group_order,
            channel_id: Some(component_id as usize),
        }
    }

    #[test]
    fn leader_uses_own_external_address() {
        let mut directory = ComponentDirectory::new();
        directory.set_self_group_order(1);

        assert!(directory.is_leader());
        assert_eq!(
            directory.http_callback_host("self.example.com:80").as_deref(),
            Some("self.example.com:80")
        );
    }

    #[test]
    fn non_leader_uses_leader_siblings_address() {
        let mut directory = ComponentDirectory::new();
        directory.set_self_group_order(2);
        directory.upsert_login(record(ComponentKind::Login, 1, 1));

        assert!(!directory.is_leader());
        assert_eq!(
            directory.http_callback_host("self.example.com:80").as_deref(),
            Some("game.example.com:1000")
        );
    }

    #[test]
    fn database_absent_until_announced() {
        let directory = ComponentDirectory::new();
        assert!(directory.database().is_none());
    }

    #[test]
    fn disconnect_clears_channel_but_keeps_record() {
        let mut directory = ComponentDirectory::new();
        directory.set_database(record(ComponentKind::Database, 1, 0));

        directory.disconnect_channel(1);

        assert!(directory.database.as_ref().unwrap().channel_id.is_none());
        assert_eq!(directory.database.as_ref().unwrap().component_id, 1);
    }

    #[test]
    fn disconnected_database_is_not_reported_ready() {
        let mut directory = ComponentDirectory::new();
        directory.set_database(record(ComponentKind::Database, 1, 0));
        assert!(directory.database().is_some());

        directory.disconnect_channel(1);

        assert!(directory.database().is_none());
    }

    #[test]
    fn disconnected_gateway_manager_is_not_reported_ready() {
        let mut directory = ComponentDirectory::new();
        directory.set_gateway_manager(record(ComponentKind::GatewayManager, 2, 0));
        assert!(directory.gateway_manager().is_some());

        directory.disconnect_channel(2);

        assert!(directory.gateway_manager().is_none());
    }
}
