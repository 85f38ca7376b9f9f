// graph_ingest/src/schema.rs
// Graph-shape inference is delegated to a pluggable resolver.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// A directed, typed relationship between two columns of the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize,)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDefinition {
    pub source_column:     String,
    pub relationship_type: String,
    pub target_column:     String,
}

impl FromStr for EdgeDefinition {
    type Err = IngestError;

    fn from_str(s: &str,) -> Result<Self,> {
        let parts: Vec<&str,> = s.split(',',).map(str::trim,).collect();
        match parts.as_slice() {
            [source, relationship, target,]
                if !source.is_empty() && !relationship.is_empty() && !target.is_empty() =>
            {
                Ok(EdgeDefinition {
                    source_column:     source.to_string(),
                    relationship_type: relationship.to_string(),
                    target_column:     target.to_string(),
                },)
            },
            _ => Err(IngestError::Schema(format!(
                "Edge definition '{}' is not 'source,RELATIONSHIP,target'",
                s
            ),),),
        }
    }
}

impl fmt::Display for EdgeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        write!(f, "{},{},{}", self.source_column, self.relationship_type, self.target_column)
    }
}

#[derive(Deserialize,)]
#[serde(untagged)]
enum RawEdgeDefinition {
    Triple(String,),
    Object {
        #[serde(alias = "sourceColumn", alias = "source")]
        source_column:     String,
        #[serde(alias = "relationshipType", alias = "relationship")]
        relationship_type: String,
        #[serde(alias = "targetColumn", alias = "target")]
        target_column:     String,
    },
}

impl<'de,> Deserialize<'de,> for EdgeDefinition {
    fn deserialize<D,>(deserializer: D,) -> std::result::Result<Self, D::Error,>
    where
        D: serde::Deserializer<'de,>,
    {
        match RawEdgeDefinition::deserialize(deserializer,)? {
            RawEdgeDefinition::Triple(s,) => s.parse().map_err(serde::de::Error::custom,),
            RawEdgeDefinition::Object {
                source_column,
                relationship_type,
                target_column,
            } => Ok(EdgeDefinition {
                source_column,
                relationship_type,
                target_column,
            },),
        }
    }
}

/// Everything the transformer needs to know about one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct GraphSchema {
    pub original_headers:    Vec<String,>,
    pub transformed_headers: Vec<String,>,
    #[serde(alias = "nodeLabel")]
    pub label:               String,
    #[serde(alias = "uniqueIdentifier")]
    pub unique_id_column:    String,
    #[serde(default, alias = "edge_definitions")]
    pub edge_definitions:    Vec<EdgeDefinition,>,
}

impl GraphSchema {
    pub fn validate(&self,) -> Result<(),> {
        if self.label.trim().is_empty() {
            return Err(IngestError::Schema("Resolver returned an empty label".to_string(),),);
        }
        if self.original_headers.is_empty() {
            return Err(IngestError::Schema("Resolver returned no original headers".to_string(),),);
        }
        Ok((),)
    }
}

/// The raw sample handed to a resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSample {
    pub records:      String,
    pub file_name:    String,
    pub graph_schema: String,
}

#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, sample: &SchemaSample,) -> Result<GraphSchema,>;
}

/// Returns the same schema for every sample; used for fixed-layout feeds and tests.
#[derive(Debug, Clone,)]
pub struct StaticSchemaResolver {
    schema: GraphSchema,
}

impl StaticSchemaResolver {
    pub fn new(schema: GraphSchema,) -> Self {
        Self { schema, }
    }

    pub fn from_json(json: &str,) -> Result<Self,> {
        let schema: GraphSchema = serde_json::from_str(json,)?;
        schema.validate()?;
        Ok(Self::new(schema,),)
    }
}

#[async_trait]
impl SchemaResolver for StaticSchemaResolver {
    async fn resolve(&self, _sample: &SchemaSample,) -> Result<GraphSchema,> {
        Ok(self.schema.clone(),)
    }
}

/// Posts the sample to a remote inference endpoint that answers with a `GraphSchema`.
pub struct HttpSchemaResolver {
    client:   Client,
    endpoint: String,
}

impl HttpSchemaResolver {
    pub fn new(endpoint: String,) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl SchemaResolver for HttpSchemaResolver {
    async fn resolve(&self, sample: &SchemaSample,) -> Result<GraphSchema,> {
        let response = self
            .client
            .post(&self.endpoint,)
            .json(sample,)
            .send()
            .await
            .map_err(|e| IngestError::Schema(format!("Resolver request failed: {}", e),),)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(IngestError::SchemaThrottled(format!(
                "Resolver rate limit exceeded ({})",
                status
            ),),);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IngestError::Schema(format!(
                "Resolver error: {} - {}",
                status, error_text
            ),),);
        }

        let schema: GraphSchema = response.json().await.map_err(|e| {
            IngestError::Schema(format!("Failed to parse resolver response: {}", e),)
        },)?;
        schema.validate()?;
        Ok(schema,)
    }
}
