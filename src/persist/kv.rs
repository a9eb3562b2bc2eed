// Copyright 2022 The Engula Authors.
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

//! A small sectioned `key=value` text format.
//!
//! ```text
//! # global section
//! [Global]
//!     group_count=1
//! ```

use std::{fmt::Display, str::FromStr};

use crate::{Error, Result};

#[derive(Default)]
pub struct KvWriter {
    buf: String,
}

impl KvWriter {
    pub fn comment(&mut self, text: impl Display) -> &mut Self {
        self.buf.push_str(&format!("# {}\n", text));
        self
    }

    pub fn section(&mut self, name: impl Display) -> &mut Self {
        self.buf.push_str(&format!("[{}]\n", name));
        self
    }

    pub fn item(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.buf.push_str(&format!("\t{}={}\n", key, value));
        self
    }

    pub fn end_section(&mut self) -> &mut Self {
        self.buf.push('\n');
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[derive(Debug, Default)]
pub struct KvSection {
    name: String,
    items: Vec<(String, String)>,
}

impl KvSection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_str(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_owned()
    }

    /// Parse `key`, zero (or default) when it is missing.
    pub fn get_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr + Default,
    {
        match self.get(key) {
            None | Some("") => Ok(T::default()),
            Some(value) => value.parse().map_err(|_| {
                Error::InvalidData(format!(
                    "section {} key {} value {:?}",
                    self.name, key, value
                ))
            }),
        }
    }

    /// Parse `key`, `NotFound` when it is missing.
    pub fn require<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr + Default,
    {
        if self.get(key).is_none() {
            return Err(Error::NotFound(format!(
                "item \"{}\" in section {}",
                key, self.name
            )));
        }
        self.get_parsed(key)
    }
}

#[derive(Debug, Default)]
pub struct KvDocument {
    sections: Vec<KvSection>,
}

impl KvDocument {
    pub fn parse(content: &str) -> Result<Self> {
        let mut sections: Vec<KvSection> = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push(KvSection {
                    name: name.trim().to_owned(),
                    items: vec![],
                });
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::InvalidData(format!("line {} {:?} is not a key value pair", lineno + 1, line))
            })?;
            let section = sections.last_mut().ok_or_else(|| {
                Error::InvalidData(format!("line {} {:?} is outside any section", lineno + 1, line))
            })?;
            section
                .items
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }
        Ok(KvDocument { sections })
    }

    pub fn section(&self, name: &str) -> Option<&KvSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn require_section(&self, name: &str) -> Result<&KvSection> {
        self.section(name)
            .ok_or_else(|| Error::NotFound(format!("section [{}]", name)))
    }
}
