// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Time related datatypes and functions

pub mod clock;
mod deadline;
mod timestamp;

pub use clock::*;
pub use core::time::Duration;
pub use deadline::{earliest, Deadline};
pub use timestamp::Timestamp;
