// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use serde_json::json;

use super::ResourceMutation;
use crate::error::OperationError;
use crate::protocol::{Intent, ResilientProtocol};
use crate::transport::Request;

impl ResilientProtocol {
    /// Creates database `name`. A one-shard database keeps all its
    /// collections on a single dbserver.
    pub async fn create_database(&self, name: &str, one_shard: bool) -> Result<(), OperationError> {
        let mut body = json!({ "name": name });
        if one_shard {
            body["options"] = json!({ "sharding": "single" });
        }
        let mut mutation = ResourceMutation {
            name: "createDatabase",
            intent: Intent::Create,
            request: Request::post("/_api/database")
                .json(body)
                .success(&[200, 201])
                .failure(&[409, 500, 503]),
            probe_path: format!("/_db/{}/_api/database/current", name),
        };
        self.execute(&mut mutation).await.map(|_| ())
    }

    /// Drops database `name`.
    pub async fn drop_database(&self, name: &str) -> Result<(), OperationError> {
        let mut mutation = ResourceMutation {
            name: "dropDatabase",
            intent: Intent::Delete,
            request: Request::delete(format!("/_api/database/{}", name))
                .success(&[200, 202])
                .failure(&[404, 500, 503]),
            probe_path: format!("/_db/{}/_api/database/current", name),
        };
        self.execute(&mut mutation).await.map(|_| ())
    }
}
