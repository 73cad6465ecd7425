// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! A single-writer serialization agent that turns a non-thread-safe MQTT
//! client into a service any number of producer tasks can share over one
//! connection. One task owns the protocol state and a table of
//! acknowledgments outstanding against the broker; producers only ever
//! reach it through a command queue, never through a shared reference.

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};

pub mod agent;
pub mod command;
mod connection_settings;
pub mod control_packet;
pub mod error;
pub mod interface;
pub mod interface_mocks;
pub mod messaging;

mod rumqttc_adapter;

#[macro_use]
extern crate derive_builder;
