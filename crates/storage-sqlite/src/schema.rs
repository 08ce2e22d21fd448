// Typed schema for the tables the engine queries directly. The remaining
// syncable tables are handled generically by the ledger.

diesel::table! {
    authentications (id) {
        id -> BigInt,
        uuid -> Text,
        user_uuid -> Nullable<Text>,
        password_hash -> Nullable<Text>,
        password_salt -> Nullable<Text>,
        current_jwt -> Nullable<Text>,
        jwt_issued_at -> Nullable<Text>,
        device_id -> Nullable<Text>,
        is_logged_in -> Bool,
        last_active -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
        is_dirty -> Bool,
        dirty_seq -> BigInt,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> BigInt,
        uuid -> Text,
        user_uuid -> Nullable<Text>,
        expiration_date -> Nullable<Text>,
        grace_period_end -> Nullable<Text>,
        #[sql_name = "type"]
        kind -> Nullable<Text>,
        status -> Nullable<Text>,
        license_code -> Nullable<Text>,
        tampered -> Bool,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
        is_dirty -> Bool,
        dirty_seq -> BigInt,
    }
}

diesel::table! {
    sync_logs (id) {
        id -> BigInt,
        uuid -> Text,
        sync_type -> Text,
        table_name -> Text,
        status -> Text,
        user_uuid -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
        is_dirty -> Bool,
        dirty_seq -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(authentications, subscriptions, sync_logs);
