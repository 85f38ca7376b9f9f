// graph_ingest/src/notification.rs
// Arrival notifications produced by object storage.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct ArrivalNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord,>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct NotificationRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: Option<BucketRef,>,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct ObjectRef {
    pub key: String,
}

/// A decoded reference to one stored object.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct ObjectLocation {
    pub bucket: Option<String,>,
    pub key:    String,
}

impl ObjectLocation {
    pub fn file_name(&self,) -> &str {
        self.key.rsplit('/',).next().unwrap_or(&self.key,)
    }
}

/// Storage test events carry `"Event": "s3:TestEvent"` and no records.
pub fn is_test_event(body: &str,) -> bool {
    body.contains("Event",) && body.contains("s3:TestEvent",)
}

/// Keys arrive form-encoded: `+` is a space and `%xx` is a byte.
pub fn decode_key(raw: &str,) -> Result<String,> {
    let spaced = raw.replace('+', " ",);
    urlencoding::decode(&spaced,)
        .map(|decoded| decoded.into_owned(),)
        .map_err(|e| IngestError::Notification(format!("Key '{}' is not valid UTF-8: {}", raw, e),),)
}

impl ArrivalNotification {
    pub fn parse(body: &str,) -> Result<Self,> {
        Ok(serde_json::from_str(body,)?,)
    }

    /// The first record's object, with its key decoded.
    pub fn first_object(&self,) -> Result<ObjectLocation,> {
        let record = self
            .records
            .first()
            .ok_or_else(|| IngestError::Notification("Notification carries no records".to_string(),),)?;
        Ok(ObjectLocation {
            bucket: record.s3.bucket.as_ref().map(|b| b.name.clone(),),
            key:    decode_key(&record.s3.object.key,)?,
        },)
    }

    pub fn for_key(bucket: &str, key: &str,) -> Self {
        let encoded = urlencoding::encode(key,).replace("%2F", "/",).replace("%20", "+",);
        Self {
            records: vec![NotificationRecord {
                s3: S3Entity {
                    bucket: Some(BucketRef {
                        name: bucket.to_string(),
                    },),
                    object: ObjectRef { key: encoded, },
                },
            }],
        }
    }
}
