/*
 * Copyright (C) 2026 The Rollwatch Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::env;

/// Enum for supported configuration parameters
#[derive(Debug)]
pub enum Config {
    /// Path or name of the control-plane CLI tool the backends shell out to.
    CliTool,
    /// Base URL of the native control-plane API.
    ApiServer,
    /// Bearer token presented by the native API backend.
    ApiToken,
}

impl Config {
    /// Returns the associated environment variable for the config parameter.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::CliTool => "ROLLWATCH_CLI_TOOL",
            Config::ApiServer => "ROLLWATCH_SERVER",
            Config::ApiToken => "ROLLWATCH_TOKEN",
        }
    }

    /// Returns the built-in default, if the parameter has one.
    pub fn default_value(&self) -> Option<&'static str> {
        match self {
            Config::CliTool => Some("kubectl"),
            Config::ApiServer => Some("https://127.0.0.1:6443"),
            Config::ApiToken => None,
        }
    }

    /// Returns the effective value, either from environment or default.
    pub fn get(&self) -> Option<String> {
        env::var(self.env_var())
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.default_value().map(str::to_string))
    }
}
