/*
 * Created on Sat Jul 10 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! A thin standalone entry point for running one instance out-of-process,
//! for smoke-testing a config file. HyperDB is meant to be embedded
//! (spec §1); this binary carries none of a server's socket/PID-file/BGSAVE
//! machinery, only enough to prove a config loads and an instance opens.

use hyperdb::config::Config;
use hyperdb::instance::Instance;
use std::env;
use std::process::ExitCode;

fn init_logger() {
    let mut builder = env_logger::Builder::new();
    match env::var("HYPERDB_LOG") {
        Ok(filter) => {
            builder.parse_filters(&filter);
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Info);
        }
    }
    builder.init();
}

fn load_config() -> Result<Config, String> {
    match env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).map_err(|e| format!("failed to read `{path}`: {e}"))?;
            Config::from_yaml_str(&raw).map_err(|e| format!("failed to parse `{path}`: {e}"))
        }
        None => Ok(Config::memory()),
    }
}

fn main() -> ExitCode {
    init_logger();
    let _ = libsky::util::terminal::write_info(format!("hyperdb v{}\n", libsky::VERSION));
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = libsky::util::terminal::write_error(format!("{e}\n"));
            return ExitCode::FAILURE;
        }
    };
    match Instance::open(config) {
        Ok(instance) => {
            log::info!("instance `{}` is up", instance.system_id());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("failed to open instance: {e}");
            ExitCode::FAILURE
        }
    }
}
