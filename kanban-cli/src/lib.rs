//! # kanban-cli
//!
//! Operator tooling for the kanban gateway. Provides the `kanban` binary:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kanban operations` | Export the operation registry as JSON |
//! | `kanban invoke <op> --params <json>` | Invoke one operation and print the envelope |
//! | `kanban sync-articles` | Import the ERP item master into the articles table |
//! | `kanban health` | Ping every configured backend |
//!
//! Configuration is read from `gateway.yaml` and `gateway-{profile}.yaml`
//! in the working directory (or `--config-dir`), overlaid with `.env` files
//! and `KANBAN_*` environment variables.

pub mod commands;
