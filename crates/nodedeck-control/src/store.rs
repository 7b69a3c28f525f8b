use std::{collections::BTreeMap, sync::Arc};

use nodedeck_db::entities::servers;
use nodedeck_process::{HandleId, ServerId, ServerStatus};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;

fn now() -> DateTimeWithTimeZone {
    chrono::Utc::now().fixed_offset()
}

pub fn env_map(model: &servers::Model) -> BTreeMap<String, String> {
    match serde_json::from_str::<BTreeMap<String, String>>(&model.env_json) {
        Ok(m) => m,
        Err(err) => {
            tracing::warn!(server_id = %model.id, %err, "ignoring malformed env column");
            BTreeMap::new()
        }
    }
}

fn env_json(env: &BTreeMap<String, String>) -> String {
    serde_json::to_string(env).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDto {
    pub id: String,
    pub name: String,
    pub status: String,
    pub owner_id: String,
    pub process_id: Option<String>,
    pub env: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&servers::Model> for ServerDto {
    fn from(m: &servers::Model) -> Self {
        Self {
            id: m.id.clone(),
            name: m.name.clone(),
            status: m.status.clone(),
            owner_id: m.owner_id.clone(),
            process_id: m.process_id.clone(),
            env: env_map(m),
            created_at: m.created_at.to_rfc3339(),
            updated_at: m.updated_at.to_rfc3339(),
        }
    }
}

pub struct NewServer {
    pub id: ServerId,
    pub name: String,
    pub owner_id: String,
    pub root_path: String,
    pub env: BTreeMap<String, String>,
}

/// Server records in the database.
#[derive(Clone)]
pub struct ServerStore {
    db: Arc<DatabaseConnection>,
}

impl ServerStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: &str) -> Result<Option<servers::Model>, DbErr> {
        servers::Entity::find_by_id(id.to_string())
            .one(&*self.db)
            .await
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<servers::Model>, DbErr> {
        servers::Entity::find()
            .filter(servers::Column::OwnerId.eq(owner_id))
            .order_by_asc(servers::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    pub async fn count_by_owner(&self, owner_id: &str) -> Result<u64, DbErr> {
        servers::Entity::find()
            .filter(servers::Column::OwnerId.eq(owner_id))
            .count(&*self.db)
            .await
    }

    pub async fn create(&self, input: NewServer) -> Result<servers::Model, DbErr> {
        let ts = now();
        servers::ActiveModel {
            id: Set(input.id.0),
            name: Set(input.name),
            status: Set(ServerStatus::Stopped.as_str().to_string()),
            owner_id: Set(input.owner_id),
            process_id: Set(None),
            root_path: Set(input.root_path),
            env_json: Set(env_json(&input.env)),
            created_at: Set(ts),
            updated_at: Set(ts),
        }
        .insert(&*self.db)
        .await
    }

    pub async fn update(
        &self,
        model: servers::Model,
        name: Option<String>,
        env: Option<&BTreeMap<String, String>>,
    ) -> Result<servers::Model, DbErr> {
        let mut active: servers::ActiveModel = model.into();
        if let Some(name) = name {
            active.name = Set(name);
        }
        if let Some(env) = env {
            active.env_json = Set(env_json(env));
        }
        active.updated_at = Set(now());
        active.update(&*self.db).await
    }

    /// Writes status and live handle after a caller-driven transition.
    pub async fn set_runtime(
        &self,
        id: &str,
        status: ServerStatus,
        handle: Option<&HandleId>,
    ) -> Result<Option<servers::Model>, DbErr> {
        let Some(model) = self.get(id).await? else {
            return Ok(None);
        };
        let mut active: servers::ActiveModel = model.into();
        active.status = Set(status.as_str().to_string());
        active.process_id = Set(handle.map(|h| h.0.clone()));
        active.updated_at = Set(now());
        active.update(&*self.db).await.map(Some)
    }

    /// Records an exit observed by the registry. Only applies while the record
    /// still points at `handle`, so a newer run is never overwritten.
    pub async fn settle_exit(
        &self,
        id: &str,
        handle: &HandleId,
        status: ServerStatus,
    ) -> Result<bool, DbErr> {
        let res = servers::Entity::update_many()
            .col_expr(servers::Column::Status, Expr::value(status.as_str()))
            .col_expr(servers::Column::ProcessId, Expr::value(Option::<String>::None))
            .col_expr(servers::Column::UpdatedAt, Expr::value(now()))
            .filter(servers::Column::Id.eq(id))
            .filter(servers::Column::ProcessId.eq(handle.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn delete(&self, id: &str) -> Result<(), DbErr> {
        servers::Entity::delete_by_id(id.to_string())
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Nothing survives a service restart, so no record can still be running.
    pub async fn reset_running_to_stopped(&self) -> Result<u64, DbErr> {
        let res = servers::Entity::update_many()
            .col_expr(
                servers::Column::Status,
                Expr::value(ServerStatus::Stopped.as_str()),
            )
            .col_expr(servers::Column::ProcessId, Expr::value(Option::<String>::None))
            .col_expr(servers::Column::UpdatedAt, Expr::value(now()))
            .filter(servers::Column::Status.eq(ServerStatus::Running.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected)
    }
}
