// Copyright 2024 Felix Engl
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

use crate::config::Configs;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use thiserror::Error;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} [{T}] {t} - {m}{n}";
const LOG_FILE_NAME: &str = "canopy.log";
const APPENDER_NAME: &str = "canopy";

/// Why the process logger could not be installed.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unable to create the log file appender: {0}")]
    Appender(#[from] std::io::Error),
    #[error("invalid logging configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),
    #[error("a logger is already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Installs the process logger: the console by default, a file under the
/// root path when `system.log_to_file` is set. The canopy logger runs at
/// `system.log_level`, everything else stays at warn.
pub fn configure_logging(configs: &Configs) -> Result<(), LoggingError> {
    let appender: Box<dyn Append> = if configs.system.log_to_file {
        std::fs::create_dir_all(configs.paths.root_path().as_std_path())?;
        let log_file = configs.paths.root_path().join(LOG_FILE_NAME);
        Box::new(
            FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
                .build(log_file.as_std_path())?,
        )
    } else {
        Box::new(
            ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
                .build(),
        )
    };

    let config = log4rs::Config::builder()
        .appender(Appender::builder().build(APPENDER_NAME, appender))
        .logger(Logger::builder().build("canopy", configs.system.log_level))
        .build(Root::builder().appender(APPENDER_NAME).build(LevelFilter::Warn))?;
    log4rs::init_config(config)?;
    Ok(())
}
