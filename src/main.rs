// Copyright 2025 Prism Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use log::{error, info};
use std::sync::Arc;

mod cache;
mod config;
mod gateway;
mod metrics;
mod upstream;

use config::Config;
use gateway::ApiGateway;

/// Prism - API gateway for the course platform
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults and environment variables apply when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("Starting Prism API Gateway...");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => {
                info!("Configuration loaded successfully from {}", path);
                config
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return Err(e);
            }
        },
        None => {
            info!("No config file given, using built-in defaults");
            Config::default()
        }
    };

    // Environment variables take precedence over the file
    config.apply_env_overrides();

    let gateway = ApiGateway::new(Arc::new(config))?;

    info!("Prism initialized successfully");

    // Start the gateway server (blocks forever)
    gateway.run()?;

    Ok(())
}
