use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Driver,
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Role::Sender),
            "driver" => Ok(Role::Driver),
            other => Err(AppError::Unauthorized(format!("unknown role: {other}"))),
        }
    }
}

/// Authenticated caller handed to the engine by the transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn sender(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Sender,
        }
    }

    pub fn driver(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Driver,
        }
    }

    pub fn require_driver(&self) -> Result<(), AppError> {
        match self.role {
            Role::Driver => Ok(()),
            Role::Sender => Err(AppError::forbidden("not authorized: driver role required")),
        }
    }

    pub fn require_sender(&self) -> Result<(), AppError> {
        match self.role {
            Role::Sender => Ok(()),
            Role::Driver => Err(AppError::forbidden("not authorized: sender role required")),
        }
    }
}
