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

use crate::app::{exec_args, CanopyArgs};
use clap::Parser;
use std::process::ExitCode;

mod adapters;
mod app;
mod config;
mod crawl;
mod engines;
mod publish;
mod robots;
mod runtime;
mod server;
mod tree;
mod url;

fn main() -> ExitCode {
    exec_args(CanopyArgs::parse())
}
