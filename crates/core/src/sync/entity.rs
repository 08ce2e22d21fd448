//! Entity registry: the static table that drives push and pull.

use serde::{Deserialize, Serialize};

use super::payload::{
    map_document, map_generic, map_subscription_payment, map_user, reverse_generic,
    ForwardMapper, ReverseMapper,
};

/// Canonical list of local tables that participate in sync, in push order.
pub const SYNC_TABLES: [&str; 15] = [
    "organizations",
    "branches",
    "users",
    "authentications",
    "customers",
    "system_configurations",
    "projects",
    "appliances",
    "subscriptions",
    "invoices",
    "payments",
    "subscription_payments",
    "documents",
    "application_settings",
    "sync_logs",
];

/// Synchronizable entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Organization,
    Branch,
    User,
    Authentication,
    Customer,
    SystemConfiguration,
    Project,
    Appliance,
    Subscription,
    Invoice,
    Payment,
    SubscriptionPayment,
    Document,
    ApplicationSettings,
    SyncLog,
}

impl SyncEntity {
    pub fn table_name(&self) -> &'static str {
        self.config().local_table
    }

    pub fn config(&self) -> &'static EntityConfig {
        config_for(*self)
    }

    pub fn from_table_name(table: &str) -> Option<Self> {
        SYNC_REGISTRY
            .iter()
            .find(|config| config.local_table == table)
            .map(|config| config.entity)
    }
}

/// Which directions an entity travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Bidirectional,
    /// Device-local audit data: pushed, never pulled back.
    PushOnly,
}

/// A binary column offloaded to blob storage on push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobField {
    /// Local column holding the bytes.
    pub column: &'static str,
    /// Remote field receiving the public URL.
    pub remote_field: &'static str,
}

/// Per-entity sync configuration.
#[derive(Debug, Clone, Copy)]
pub struct EntityConfig {
    pub entity: SyncEntity,
    pub local_table: &'static str,
    pub remote_collection: &'static str,
    pub direction: SyncDirection,
    /// Cross-references that must be present before a record may be pushed.
    pub required_refs: &'static [&'static str],
    /// Columns that stay on this device (credentials, tokens).
    pub local_columns: &'static [&'static str],
    pub blob_fields: &'static [BlobField],
    pub forward: ForwardMapper,
    pub reverse: ReverseMapper,
}

impl EntityConfig {
    pub fn is_pulled(&self) -> bool {
        self.direction == SyncDirection::Bidirectional
    }

    pub fn blob_field(&self, column: &str) -> Option<&BlobField> {
        self.blob_fields.iter().find(|field| field.column == column)
    }
}

const USER_BLOBS: &[BlobField] = &[BlobField {
    column: "business_logo",
    remote_field: "business_logo",
}];

const DOCUMENT_BLOBS: &[BlobField] = &[BlobField {
    column: "file_blob",
    remote_field: "file_path",
}];

const SUBSCRIPTION_PAYMENT_BLOBS: &[BlobField] = &[BlobField {
    column: "trx_screenshot",
    remote_field: "trx_screenshot",
}];

const fn generic(
    entity: SyncEntity,
    table: &'static str,
    required_refs: &'static [&'static str],
) -> EntityConfig {
    EntityConfig {
        entity,
        local_table: table,
        remote_collection: table,
        direction: SyncDirection::Bidirectional,
        required_refs,
        local_columns: &[],
        blob_fields: &[],
        forward: map_generic,
        reverse: reverse_generic,
    }
}

/// The registry, in dependency order: referents before their dependents.
static SYNC_REGISTRY: [EntityConfig; 15] = [
    generic(SyncEntity::Organization, "organizations", &[]),
    generic(SyncEntity::Branch, "branches", &["organization_uuid"]),
    EntityConfig {
        blob_fields: USER_BLOBS,
        forward: map_user,
        ..generic(SyncEntity::User, "users", &[])
    },
    EntityConfig {
        local_columns: &["current_jwt", "password_salt"],
        ..generic(SyncEntity::Authentication, "authentications", &["user_uuid"])
    },
    generic(SyncEntity::Customer, "customers", &[]),
    generic(SyncEntity::SystemConfiguration, "system_configurations", &[]),
    generic(SyncEntity::Project, "projects", &["user_uuid"]),
    generic(SyncEntity::Appliance, "appliances", &["project_uuid"]),
    generic(SyncEntity::Subscription, "subscriptions", &["user_uuid"]),
    generic(SyncEntity::Invoice, "invoices", &["project_uuid"]),
    generic(SyncEntity::Payment, "payments", &["invoice_uuid"]),
    EntityConfig {
        blob_fields: SUBSCRIPTION_PAYMENT_BLOBS,
        forward: map_subscription_payment,
        ..generic(
            SyncEntity::SubscriptionPayment,
            "subscription_payments",
            &["subscription_uuid"],
        )
    },
    EntityConfig {
        blob_fields: DOCUMENT_BLOBS,
        forward: map_document,
        ..generic(SyncEntity::Document, "documents", &["project_uuid"])
    },
    generic(SyncEntity::ApplicationSettings, "application_settings", &[]),
    EntityConfig {
        direction: SyncDirection::PushOnly,
        ..generic(SyncEntity::SyncLog, "sync_logs", &[])
    },
];

/// All entity configurations in push (dependency) order.
pub fn sync_registry() -> &'static [EntityConfig] {
    &SYNC_REGISTRY
}

pub fn config_for(entity: SyncEntity) -> &'static EntityConfig {
    SYNC_REGISTRY
        .iter()
        .find(|config| config.entity == entity)
        .unwrap_or_else(|| unreachable!("every SyncEntity has a registry entry"))
}

/// Push order: dependency order.
pub fn push_order() -> impl Iterator<Item = &'static EntityConfig> {
    SYNC_REGISTRY.iter()
}

/// Pull order: reverse dependency order, push-only entities excluded.
pub fn pull_order() -> impl Iterator<Item = &'static EntityConfig> {
    SYNC_REGISTRY.iter().rev().filter(|config| config.is_pulled())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_matches_canonical_table_list() {
        let tables = sync_registry()
            .iter()
            .map(|config| config.local_table)
            .collect::<Vec<_>>();
        assert_eq!(tables, SYNC_TABLES.to_vec());
    }

    #[test]
    fn referents_precede_dependents_in_push_order() {
        let position = |table: &str| SYNC_TABLES.iter().position(|t| *t == table).unwrap();
        assert!(position("organizations") < position("branches"));
        assert!(position("users") < position("authentications"));
        assert!(position("projects") < position("appliances"));
        assert!(position("subscriptions") < position("subscription_payments"));
        assert!(position("invoices") < position("payments"));
    }

    #[test]
    fn pull_order_is_reversed_and_skips_push_only_entities() {
        let pulled = pull_order().map(|c| c.local_table).collect::<Vec<_>>();
        assert_eq!(pulled.first(), Some(&"application_settings"));
        assert_eq!(pulled.last(), Some(&"organizations"));
        assert!(!pulled.contains(&"sync_logs"));
    }

    #[test]
    fn table_names_round_trip_through_entity() {
        for table in SYNC_TABLES {
            let entity = SyncEntity::from_table_name(table).expect("known table");
            assert_eq!(entity.table_name(), table);
        }
        assert_eq!(SyncEntity::from_table_name("goals"), None);
    }

    #[test]
    fn sync_entity_serialization_matches_wire_contract() {
        let value = serde_json::to_string(&SyncEntity::SubscriptionPayment).unwrap();
        assert_eq!(value, "\"subscription_payment\"");
    }
}
