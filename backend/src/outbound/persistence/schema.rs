//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `migrations/` exactly. Regenerate with
//! `diesel print-schema` when the migrations change.

diesel::table! {
    /// Notifications accepted for delivery.
    ///
    /// `id` comes from the snowflake generator, never from a sequence.
    /// `(biz_id, key)` is unique.
    notifications (id) {
        id -> Int8,
        biz_id -> Int8,
        /// Caller-supplied idempotency key.
        key -> Varchar,
        receivers -> Array<Text>,
        /// One of `SMS`, `EMAIL`, `IN_APP`.
        channel -> Varchar,
        template_id -> Int8,
        template_version_id -> Int8,
        template_params -> Jsonb,
        /// One of `PREPARE`, `CANCELED`, `PENDING`, `SENDING`, `SUCCEEDED`, `FAILED`.
        status -> Varchar,
        scheduled_stime -> Timestamptz,
        scheduled_etime -> Timestamptz,
        /// Optimistic concurrency counter; starts at 1.
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Callback retry state, one row per notification that asked for it.
    callback_logs (id) {
        id -> Int8,
        notification_id -> Int8,
        retry_count -> Int4,
        next_retry_time -> Timestamptz,
        /// One of `INIT`, `PENDING`, `SUCCEEDED`, `FAILED`.
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(callback_logs -> notifications (notification_id));
diesel::allow_tables_to_appear_in_same_query!(notifications, callback_logs);
