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

//! Reflex ECS - reflection-driven Entity Component System
//!
//! Archetype storage with first-class binary relations, a term-based query
//! planner, deferred command buffers with observers, and a scheduler which
//! colors non-conflicting systems into parallel groups.

pub mod any_vec;
pub mod archetype;
pub mod blueprint;
pub mod command;
pub mod entity;
pub mod error;
pub mod event;
pub mod observer;
pub mod query;
pub mod reflect;
pub mod table;
pub mod types;
pub mod world;

// Scheduling layer
pub mod app;
pub mod executor;
pub mod schedule;
pub mod system;

// Re-exports for convenience
pub use any_vec::{AnyValue, AnyVec};
pub use app::{App, FrameClock, Plugin, ShouldQuit};
pub use archetype::{ArchetypeGraph, ArchetypeId, ColumnId};
pub use blueprint::{Blueprint, BlueprintEntity};
pub use command::{CommandBuffer, Commands};
pub use entity::{Entity, EntityPool};
pub use error::{EcsError, Result};
pub use event::{EventPipe, EventReader, EventWriter};
pub use executor::Executor;
pub use observer::{ObserverId, ObserverKind};
pub use query::{Query, QueryBuilder, QueryData, QueryTerm, QueryTerms, RawQuery};
pub use reflect::{ConstructibleTrait, Reflect, Type};
pub use schedule::{OrderRef, Schedule, Tag};
pub use system::{system, BoxedSystem, FnSystem, System, SystemAccess, SystemContext};
pub use types::{DataTypeId, RelationFlags, TypeKind, Types};
pub use world::{Res, ResMut, World};

/// Everything most applications need
pub mod prelude {
    pub use crate::app::{App, FrameClock, Plugin, ShouldQuit};
    pub use crate::blueprint::Blueprint;
    pub use crate::command::Commands;
    pub use crate::entity::Entity;
    pub use crate::error::{EcsError, Result};
    pub use crate::event::{EventPipe, EventReader, EventWriter};
    pub use crate::executor::Executor;
    pub use crate::impl_reflect;
    pub use crate::observer::ObserverKind;
    pub use crate::query::Query;
    pub use crate::reflect::Reflect;
    pub use crate::schedule::Schedule;
    pub use crate::system::{system, System, SystemContext};
    pub use crate::world::World;
}
