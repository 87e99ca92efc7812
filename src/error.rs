// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types

use crate::entity::Entity;

/// ECS error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum EcsError {
    /// Operation on an entity which is not alive
    #[error("entity {0} is not alive")]
    DeadEntity(Entity),

    /// A type with the same name or Rust identity was registered twice
    #[error("type `{0}` is already registered")]
    AlreadyRegistered(String),

    /// A type lacks a reflection trait required by the operation
    #[error("type `{name}` is missing the `{trait_name}` trait")]
    MissingTrait {
        name: String,
        trait_name: &'static str,
    },

    /// No registered type with the given name
    #[error("no registered type named `{0}`")]
    UnknownType(String),

    /// A type was registered under a kind the operation does not accept
    #[error("type `{name}` is registered as a {kind}, expected a {expected}")]
    WrongKind {
        name: String,
        kind: &'static str,
        expected: &'static str,
    },

    /// A relation was declared with an unsupported flag combination
    #[error("invalid relation `{0}`: {1}")]
    InvalidRelation(String, &'static str),

    /// A query term referenced an out-of-range target
    #[error("query target {0} is out of range (max {1})")]
    TargetOutOfRange(usize, usize),

    /// System ordering constraints form a cycle
    #[error("system ordering cycle: {0}")]
    OrderingCycle(String),

    /// An ordering constraint referenced an unknown system or tag
    #[error("unknown system or tag `{0}` in ordering constraint")]
    UnknownOrderingTarget(String),

    /// Observer-triggered commands did not settle within the round bound
    #[error("observer commit did not settle after {rounds} rounds: {trail}")]
    ObserverOverflow { rounds: usize, trail: String },

    /// Blueprint spawning failed
    #[error("blueprint error: {0}")]
    Blueprint(String),

    /// Plugin installation failed
    #[error("plugin error: {0}")]
    Plugin(String),

    /// A system returned an application-defined error
    #[error("system `{0}` failed: {1}")]
    System(String, String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
