//! Diesel schema for queue persistence.

diesel::table! {
    /// Producer-submitted jobs with their aggregate status.
    jobs (id) {
        /// Job identifier.
        id -> Uuid,
        /// Optional metadata payload.
        metadata -> Nullable<Jsonb>,
        /// Aggregate status maintained by the builder finalisation pass.
        #[max_length = 50]
        status -> Varchar,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Claimable task records; `sequence` is a BIGSERIAL so the datastore
    /// assigns the global fairness ordering at insertion.
    job_tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Owning job identifier.
        job_id -> Uuid,
        /// Logical routing key for agent selection.
        #[max_length = 255]
        service -> Varchar,
        /// Datastore-assigned monotonic ordering position.
        sequence -> Int8,
        /// Task lifecycle status.
        #[max_length = 50]
        status -> Varchar,
        /// Optional application payload.
        payload -> Nullable<Jsonb>,
        /// Node holding the current lease, if any.
        #[max_length = 255]
        claimed_by -> Nullable<Varchar>,
        /// Lease expiry instant, set on claim and cleared on release.
        lease_expires_at -> Nullable<Timestamptz>,
        /// Next-eligible instant set by retry backoff.
        not_before -> Nullable<Timestamptz>,
        /// Attempt counter, incremented on each claim.
        attempts -> Int4,
        /// Most recent failure detail.
        last_error -> Nullable<Text>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(job_tasks -> jobs (job_id));
diesel::allow_tables_to_appear_in_same_query!(jobs, job_tasks);
