use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Order has no items")]
    EmptyOrder,

    #[error("Insufficient stock for {name}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: i64,
        name: String,
        requested: i32,
        available: i32,
    },

    #[error("{name} does not belong to supplier {supplier_id}")]
    MixedSupplier {
        item_id: i64,
        name: String,
        supplier_id: i64,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppError {
    /// Conflicts are worth retrying once the competing transaction settles.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AppError::InsufficientStock { .. } | AppError::MixedSupplier { .. } | AppError::Conflict(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".into()),
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(format!(
                "Record already exists ({})",
                db.constraint().unwrap_or("unique constraint")
            )),
            other => AppError::Storage(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::EmptyOrder
            | AppError::InsufficientStock { .. }
            | AppError::MixedSupplier { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Storage(detail) => {
                log::error!("❌ Storage failure: {}", detail);
                "Internal storage error, please retry".to_string()
            }
            AppError::ExternalService(detail) => {
                log::error!("❌ External service failure: {}", detail);
                "Upstream service unavailable".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}
