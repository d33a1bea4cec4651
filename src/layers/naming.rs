// Copyright 2021 Datafuse Labs
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

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use serde::Deserialize;

use crate::{
    error::QueryError,
    query::{Expression, GroupKey, SeriesQuery, SeriesResult, Transform},
};

use super::Layer;

#[derive(Debug, Default, Deserialize)]
struct NameMappings {
    #[serde(default)]
    metrics: HashMap<String, String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Translates user-facing metric and tag names into stored ones, and tag
/// keys back again on the way out. Each stored tag key has at most one
/// public name.
#[derive(Debug, Clone, Default)]
pub struct PublicNameLayer {
    metrics: HashMap<String, String>,
    tags: HashMap<String, String>,
    public_tags: HashMap<String, String>,
}

impl PublicNameLayer {
    pub fn from_json(raw: &str) -> Result<Self, QueryError> {
        let mappings: NameMappings = serde_json::from_str(raw)
            .map_err(|err| QueryError::Config(format!("invalid public names: {err}")))?;
        let layer = mappings
            .metrics
            .into_iter()
            .fold(Self::default(), |layer, (public, mri)| layer.metric(public, mri));
        mappings
            .tags
            .into_iter()
            .try_fold(layer, |layer, (public, stored)| layer.tag(public, stored))
    }

    pub fn from_file(path: &Path) -> Result<Self, QueryError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            QueryError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn metric(mut self, public: impl Into<String>, mri: impl Into<String>) -> Self {
        self.metrics.insert(public.into(), mri.into());
        self
    }

    pub fn tag(
        mut self,
        public: impl Into<String>,
        stored: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let (public, stored) = (public.into(), stored.into());
        if let Some(existing) = self.public_tags.get(&stored) {
            if *existing != public {
                return Err(QueryError::Config(format!(
                    "tag `{stored}` is published as both `{existing}` and `{public}`"
                )));
            }
        }
        if let Some(previous) = self.tags.insert(public.clone(), stored.clone()) {
            self.public_tags.remove(&previous);
        }
        self.public_tags.insert(stored, public);
        Ok(self)
    }

    fn public_tag<'a>(&'a self, stored: &'a str) -> &'a str {
        self.public_tags
            .get(stored)
            .map(String::as_str)
            .unwrap_or(stored)
    }
}

impl Layer for PublicNameLayer {
    fn name(&self) -> &'static str {
        "public_names"
    }

    fn transform_query(&self, query: SeriesQuery) -> Result<SeriesQuery, QueryError> {
        Renamer { names: self }.transform_query(query)
    }

    fn transform_result(&self, mut result: SeriesResult) -> Result<SeriesResult, QueryError> {
        if self.tags.is_empty() {
            return Ok(result);
        }
        result.tags = std::mem::take(&mut result.tags)
            .into_iter()
            .map(|(key, values)| (self.public_tag(&key).to_string(), values))
            .collect();
        let rename = |group: GroupKey| {
            GroupKey::new(
                group
                    .tags()
                    .iter()
                    .map(|(key, value)| (self.public_tag(key).to_string(), value.clone())),
            )
        };
        result.groups = std::mem::take(&mut result.groups)
            .into_iter()
            .map(|(group, series)| (rename(group), series))
            .collect::<BTreeMap<_, _>>();
        result.totals = std::mem::take(&mut result.totals)
            .into_iter()
            .map(|(group, totals)| (rename(group), totals))
            .collect::<BTreeMap<_, _>>();
        Ok(result)
    }
}

struct Renamer<'a> {
    names: &'a PublicNameLayer,
}

impl Transform for Renamer<'_> {
    fn transform_metric(&mut self, name: String) -> Result<Expression, QueryError> {
        Ok(Expression::Metric(
            self.names.metrics.get(&name).cloned().unwrap_or(name),
        ))
    }

    fn transform_tag(&mut self, key: String) -> Result<String, QueryError> {
        Ok(self.names.tags.get(&key).cloned().unwrap_or(key))
    }
}
