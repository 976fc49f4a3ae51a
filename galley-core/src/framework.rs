use sqlx::PgPool;

/// Entry point for every SQL query object; queries are expressed as
/// `kanau::processor::Processor<Query>` impls on this type.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
