// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod ack;
pub mod error;
pub mod frame;
pub mod log;
pub mod packet;
pub mod recovery;
pub mod status;
pub mod time;
pub mod varint;
