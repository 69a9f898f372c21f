pub mod config;
pub mod directory;
pub mod error;
pub mod events;
mod pair_lock;
pub mod query;
pub mod routes;
pub mod store;
pub mod workflow;

use anyhow::Context;
use axum::{Extension, Router};
use rapport_common::Username;
use sled::Db;

use crate::config::Config;
use crate::directory::Directory;
use crate::events::EventHub;
use crate::query::QueryService;
use crate::store::RelationshipStore;
use crate::workflow::Workflow;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub directory: Directory,
    pub workflow: Workflow,
    pub queries: QueryService,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let db = config.open_db().context("Error opening database")?;
        Self::with_db(db, config)
    }

    pub fn with_db(db: Db, config: &Config) -> anyhow::Result<Self> {
        let directory = Directory::open(&db)?;
        for user in &config.seed_users {
            directory
                .register(&Username::new(user.as_str()))
                .with_context(|| format!("Error registering seed user {user}"))?;
        }
        let store = RelationshipStore::open(&db, directory.clone())?;
        let events = EventHub::new(config.event_capacity);
        Ok(Self {
            db,
            directory,
            workflow: Workflow::new(store.clone(), events, config.store_timeout()),
            queries: QueryService::new(store, config.store_timeout()),
        })
    }
}

pub fn app(state: AppState) -> Router {
    routes::router().layer(Extension(state))
}
