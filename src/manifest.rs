use std::collections::BTreeMap;

use handlebars::{no_escape, Handlebars};
use serde::Serialize;

use crate::error::ProbeError;

static RAW_PVC_CLAIM: &str = r#"{
    "kind": "PersistentVolumeClaim",
    "apiVersion": "v1",
    "metadata": {
        "name": "{{name}}",
        "annotations": {
            "volume.beta.kubernetes.io/storage-class": "{{class}}"
        }
    },
    "spec": {
        "accessModes": [
            "ReadWriteOnce"
        ],
        "resources": {
            "requests": {
                "storage": "{{size}}Gi"
            }
        }
    }
}"#;

static RAW_APP_POD: &str = r#"kind: Pod
apiVersion: v1
metadata:
  name: {{name}}
spec:
  containers:
    - name: {{name}}
      image: {{image}}
      volumeMounts:
        - mountPath: /var/www/html
          name: storage-vol
  volumes:
    - name: storage-vol
      persistentVolumeClaim:
        claimName: {{claim}}
        readOnly: false"#;

static RAW_SECRET: &str = r#"apiVersion: v1
kind: Secret
metadata:
  name: {{name}}
  namespace: {{namespace}}
data:
  key: {{key}}
type: {{type}}"#;

static RAW_STORAGE_CLASS: &str = r#"apiVersion: storage.k8s.io/v1
kind: StorageClass
metadata:
  name: {{name}}
provisioner: {{provisioner}}
parameters:
  resturl: "{{resturl}}""#;

static RAW_MONGODB_APP: &str = r#"{
    "kind": "Template",
    "apiVersion": "v1",
    "metadata": {
        "name": "mongodb-persistent",
        "annotations": {
            "description": "MongoDB database service, with persistent storage."
        }
    },
    "objects": [
        {
            "kind": "Service",
            "apiVersion": "v1",
            "metadata": {
                "name": "${DATABASE_SERVICE_NAME}"
            },
            "spec": {
                "ports": [
                    {
                        "name": "mongo",
                        "port": 27017,
                        "targetPort": 27017
                    }
                ],
                "selector": {
                    "name": "${DATABASE_SERVICE_NAME}"
                }
            }
        },
        {
            "kind": "PersistentVolumeClaim",
            "apiVersion": "v1",
            "metadata": {
                "name": "${DATABASE_SERVICE_NAME}",
                "annotations": {
                    "volume.beta.kubernetes.io/storage-class": "{{class}}"
                }
            },
            "spec": {
                "accessModes": [
                    "ReadWriteOnce"
                ],
                "resources": {
                    "requests": {
                        "storage": "${VOLUME_CAPACITY}"
                    }
                }
            }
        },
        {
            "kind": "DeploymentConfig",
            "apiVersion": "v1",
            "metadata": {
                "name": "${DATABASE_SERVICE_NAME}"
            },
            "spec": {
                "replicas": 1,
                "selector": {
                    "name": "${DATABASE_SERVICE_NAME}"
                },
                "template": {
                    "metadata": {
                        "labels": {
                            "name": "${DATABASE_SERVICE_NAME}"
                        }
                    },
                    "spec": {
                        "containers": [
                            {
                                "name": "mongodb",
                                "image": "registry.access.redhat.com/rhscl/mongodb-32-rhel7",
                                "ports": [
                                    {
                                        "containerPort": 27017
                                    }
                                ],
                                "env": [
                                    {
                                        "name": "MONGODB_USER",
                                        "value": "${MONGODB_USER}"
                                    },
                                    {
                                        "name": "MONGODB_PASSWORD",
                                        "value": "${MONGODB_PASSWORD}"
                                    },
                                    {
                                        "name": "MONGODB_DATABASE",
                                        "value": "${MONGODB_DATABASE}"
                                    },
                                    {
                                        "name": "MONGODB_ADMIN_PASSWORD",
                                        "value": "${MONGODB_ADMIN_PASSWORD}"
                                    }
                                ],
                                "volumeMounts": [
                                    {
                                        "name": "${DATABASE_SERVICE_NAME}-data",
                                        "mountPath": "/var/lib/mongodb/data"
                                    }
                                ]
                            }
                        ],
                        "volumes": [
                            {
                                "name": "${DATABASE_SERVICE_NAME}-data",
                                "persistentVolumeClaim": {
                                    "claimName": "${DATABASE_SERVICE_NAME}"
                                }
                            }
                        ]
                    }
                }
            }
        }
    ],
    "parameters": [
        {
            "name": "DATABASE_SERVICE_NAME",
            "description": "The name of the OpenShift Service exposed for the database.",
            "value": "mongodb",
            "required": true
        },
        {
            "name": "MONGODB_USER",
            "description": "Username for MongoDB user that will be used for accessing the database.",
            "generate": "expression",
            "from": "user[A-Z0-9]{3}"
        },
        {
            "name": "MONGODB_PASSWORD",
            "description": "Password for the MongoDB connection user.",
            "generate": "expression",
            "from": "[a-zA-Z0-9]{16}"
        },
        {
            "name": "MONGODB_DATABASE",
            "description": "Name of the MongoDB database accessed.",
            "value": "sampledb",
            "required": true
        },
        {
            "name": "MONGODB_ADMIN_PASSWORD",
            "description": "Password for the database admin user.",
            "generate": "expression",
            "from": "[a-zA-Z0-9]{16}"
        },
        {
            "name": "VOLUME_CAPACITY",
            "description": "Volume space available for data.",
            "value": "1Gi",
            "required": true
        }
    ]
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    PvcClaim,
    AppPod,
    Secret,
    StorageClass,
    MongodbApp,
}

impl TemplateKind {
    fn raw(self) -> &'static str {
        match self {
            TemplateKind::PvcClaim => RAW_PVC_CLAIM,
            TemplateKind::AppPod => RAW_APP_POD,
            TemplateKind::Secret => RAW_SECRET,
            TemplateKind::StorageClass => RAW_STORAGE_CLASS,
            TemplateKind::MongodbApp => RAW_MONGODB_APP,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TemplateKind::PvcClaim => "pvc_claim",
            TemplateKind::AppPod => "app_pod",
            TemplateKind::Secret => "secret",
            TemplateKind::StorageClass => "storage_class",
            TemplateKind::MongodbApp => "mongodb_app",
        }
    }

    fn json(self) -> bool {
        matches!(self, TemplateKind::PvcClaim | TemplateKind::MongodbApp)
    }
}

/// Override value for a single document field.
#[derive(Debug, Clone)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    /// Parse a command line literal: booleans and integers are recognized,
    /// everything else stays a string.
    pub fn from_literal(literal: &str) -> Self {
        if let Ok(flag) = literal.parse::<bool>() {
            return Scalar::Bool(flag);
        }
        if let Ok(number) = literal.parse::<i64>() {
            return Scalar::Int(number);
        }
        Scalar::Str(literal.to_string())
    }

    fn into_json(self) -> serde_json::Value {
        match self {
            Scalar::Str(text) => serde_json::Value::String(text),
            Scalar::Int(number) => serde_json::Value::from(number),
            Scalar::Bool(flag) => serde_json::Value::Bool(flag),
        }
    }

    fn into_yaml(self) -> serde_yaml::Value {
        match self {
            Scalar::Str(text) => serde_yaml::Value::String(text),
            Scalar::Int(number) => serde_yaml::Value::from(number),
            Scalar::Bool(flag) => serde_yaml::Value::Bool(flag),
        }
    }
}

impl From<&str> for Scalar {
    fn from(text: &str) -> Self {
        Scalar::Str(text.to_string())
    }
}

impl From<String> for Scalar {
    fn from(text: String) -> Self {
        Scalar::Str(text)
    }
}

/// A `path=value` field override, as accepted on the command line.
#[derive(Debug, Clone)]
pub struct FieldOverride {
    pub path: String,
    pub value: Scalar,
}

/// An ordered structured document rendered from a template. Key order is
/// kept through patching and serialization; the cluster-side tooling the
/// files are fed to is sensitive to it.
#[derive(Debug, Clone)]
pub enum Document {
    Json(serde_json::Value),
    Yaml(serde_yaml::Value),
}

impl Document {
    /// Patch a single field addressed by a dot separated path. Path segments
    /// index into mappings (created when missing) and, when they parse as a
    /// number, into sequences. Keys that contain dots cannot be addressed.
    pub fn set(&mut self, path: &str, value: Scalar) -> Result<(), ProbeError> {
        match self {
            Document::Json(root) => json_set(root, path, value.into_json()),
            Document::Yaml(root) => yaml_set(root, path, value.into_yaml()),
        }
    }

    /// Deserialize into a typed resource, used to validate documents before
    /// they are shipped.
    pub fn typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProbeError> {
        match self {
            Document::Json(value) => Ok(serde_json::from_value(value.clone())?),
            Document::Yaml(value) => Ok(serde_yaml::from_value(value.clone())?),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProbeError> {
        match self {
            Document::Json(value) => {
                let mut out = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
                let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
                value.serialize(&mut serializer)?;
                out.push(b'\n');
                Ok(out)
            }
            Document::Yaml(value) => Ok(serde_yaml::to_string(value)?.into_bytes()),
        }
    }
}

fn json_set(
    root: &mut serde_json::Value,
    path: &str,
    value: serde_json::Value,
) -> Result<(), ProbeError> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, inner) = segments
        .split_last()
        .ok_or_else(|| ProbeError::patch(path, "empty path"))?;
    let mut node = root;
    for segment in inner {
        node = match node {
            serde_json::Value::Array(items) => {
                let index = parse_index(path, segment)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| ProbeError::patch(path, format!("index {} out of range", index)))?
            }
            serde_json::Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new())),
            _ => {
                return Err(ProbeError::patch(
                    path,
                    format!("`{}` is not a collection", segment),
                ))
            }
        };
    }
    match node {
        serde_json::Value::Array(items) => {
            let index = parse_index(path, last)?;
            let slot = items
                .get_mut(index)
                .ok_or_else(|| ProbeError::patch(path, format!("index {} out of range", index)))?;
            *slot = value;
        }
        serde_json::Value::Object(map) => {
            map.insert(last.to_string(), value);
        }
        _ => {
            return Err(ProbeError::patch(
                path,
                format!("`{}` is not a collection", last),
            ))
        }
    }
    Ok(())
}

fn yaml_set(
    root: &mut serde_yaml::Value,
    path: &str,
    value: serde_yaml::Value,
) -> Result<(), ProbeError> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, inner) = segments
        .split_last()
        .ok_or_else(|| ProbeError::patch(path, "empty path"))?;
    let mut node = root;
    for segment in inner {
        node = match node {
            serde_yaml::Value::Sequence(items) => {
                let index = parse_index(path, segment)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| ProbeError::patch(path, format!("index {} out of range", index)))?
            }
            serde_yaml::Value::Mapping(map) => {
                let key = serde_yaml::Value::String(segment.to_string());
                if !map.contains_key(&key) {
                    map.insert(
                        key.clone(),
                        serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
                    );
                }
                map.get_mut(&key)
                    .ok_or_else(|| ProbeError::patch(path, "mapping insert failed"))?
            }
            _ => {
                return Err(ProbeError::patch(
                    path,
                    format!("`{}` is not a collection", segment),
                ))
            }
        };
    }
    match node {
        serde_yaml::Value::Sequence(items) => {
            let index = parse_index(path, last)?;
            let slot = items
                .get_mut(index)
                .ok_or_else(|| ProbeError::patch(path, format!("index {} out of range", index)))?;
            *slot = value;
        }
        serde_yaml::Value::Mapping(map) => {
            map.insert(serde_yaml::Value::String(last.to_string()), value);
        }
        _ => {
            return Err(ProbeError::patch(
                path,
                format!("`{}` is not a collection", last),
            ))
        }
    }
    Ok(())
}

fn parse_index(path: &str, segment: &str) -> Result<usize, ProbeError> {
    segment
        .parse::<usize>()
        .map_err(|_| ProbeError::patch(path, format!("`{}` is not a sequence index", segment)))
}

/// Render one of the embedded templates with the given attributes and parse
/// the result; every call yields an independent document.
fn render(kind: TemplateKind, attributes: &BTreeMap<&str, String>) -> Result<Document, ProbeError> {
    let mut handler = Handlebars::new();
    handler.register_template_string(kind.name(), kind.raw())?;
    handler.register_escape_fn(no_escape);
    let text = handler.render(kind.name(), attributes)?;
    if kind.json() {
        Ok(Document::Json(serde_json::from_str(&text)?))
    } else {
        Ok(Document::Yaml(serde_yaml::from_str(&text)?))
    }
}

pub fn render_pvc_claim(
    claim_name: &str,
    storage_class: &str,
    size_gib: u64,
) -> Result<Document, ProbeError> {
    let mut attribute: BTreeMap<&str, String> = BTreeMap::new();
    attribute.insert("name", claim_name.to_string());
    attribute.insert("class", storage_class.to_string());
    attribute.insert("size", size_gib.to_string());
    render(TemplateKind::PvcClaim, &attribute)
}

pub fn render_app_pod(app_name: &str, claim_name: &str, image: &str) -> Result<Document, ProbeError> {
    let mut attribute: BTreeMap<&str, String> = BTreeMap::new();
    attribute.insert("name", app_name.to_string());
    attribute.insert("claim", claim_name.to_string());
    attribute.insert("image", image.to_string());
    render(TemplateKind::AppPod, &attribute)
}

pub fn render_secret(
    name: &str,
    namespace: &str,
    data_key: &str,
    secret_type: &str,
) -> Result<Document, ProbeError> {
    let mut attribute: BTreeMap<&str, String> = BTreeMap::new();
    attribute.insert("name", name.to_string());
    attribute.insert("namespace", namespace.to_string());
    attribute.insert("key", data_key.to_string());
    attribute.insert("type", secret_type.to_string());
    render(TemplateKind::Secret, &attribute)
}

pub fn render_storage_class(
    name: &str,
    resturl: &str,
    provisioner: &str,
) -> Result<Document, ProbeError> {
    let mut attribute: BTreeMap<&str, String> = BTreeMap::new();
    attribute.insert("name", name.to_string());
    attribute.insert("resturl", resturl.to_string());
    attribute.insert("provisioner", provisioner.to_string());
    render(TemplateKind::StorageClass, &attribute)
}

pub fn render_mongodb_app(storage_class: &str) -> Result<Document, ProbeError> {
    let mut attribute: BTreeMap<&str, String> = BTreeMap::new();
    attribute.insert("class", storage_class.to_string());
    render(TemplateKind::MongodbApp, &attribute)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
    use k8s_openapi::api::storage::v1::StorageClass;

    use super::*;

    #[test]
    fn pvc_claim_renders_ordered_json() {
        let expected = r#"{
    "kind": "PersistentVolumeClaim",
    "apiVersion": "v1",
    "metadata": {
        "name": "storage-claim1",
        "annotations": {
            "volume.beta.kubernetes.io/storage-class": "fast"
        }
    },
    "spec": {
        "accessModes": [
            "ReadWriteOnce"
        ],
        "resources": {
            "requests": {
                "storage": "10Gi"
            }
        }
    }
}
"#;
        let doc = render_pvc_claim("storage-claim1", "fast", 10).unwrap();
        doc.typed::<PersistentVolumeClaim>().unwrap();
        assert_eq!(String::from_utf8(doc.to_bytes().unwrap()).unwrap(), expected);
    }

    #[test]
    fn app_pod_renders_typed_pod() {
        let doc = render_app_pod("nginx1", "storage-claim1", "nginx").unwrap();
        let pod: Pod = doc.typed().unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("nginx1"));
        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers[0].name, "nginx1");
        assert_eq!(spec.containers[0].image.as_deref(), Some("nginx"));
        let volumes = spec.volumes.unwrap();
        let claim = volumes[0].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(claim.claim_name, "storage-claim1");
        assert_eq!(claim.read_only, Some(false));
    }

    #[test]
    fn secret_renders_typed_secret() {
        let doc = render_secret(
            "heketi-secret",
            "storage-project",
            "cGFzc3dvcmQ=",
            "kubernetes.io/glusterfs",
        )
        .unwrap();
        let secret: Secret = doc.typed().unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("heketi-secret"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("storage-project"));
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/glusterfs"));
    }

    #[test]
    fn storage_class_takes_parameter_overrides() {
        let mut doc = render_storage_class(
            "fast",
            "http://heketi-storage-project.cloudapps.mystorage.com",
            "kubernetes.io/glusterfs",
        )
        .unwrap();
        doc.set("parameters.hacount", Scalar::from("3")).unwrap();
        doc.set("parameters.restuser", Scalar::from("admin")).unwrap();
        let class: StorageClass = doc.typed().unwrap();
        assert_eq!(class.provisioner, "kubernetes.io/glusterfs");
        let parameters = class.parameters.unwrap();
        assert_eq!(parameters.get("hacount").map(String::as_str), Some("3"));
        assert_eq!(
            parameters.get("resturl").map(String::as_str),
            Some("http://heketi-storage-project.cloudapps.mystorage.com")
        );
    }

    #[test]
    fn set_indexes_into_sequences() {
        let mut doc = render_app_pod("nginx1", "claim1", "nginx").unwrap();
        doc.set("spec.containers.0.image", Scalar::from("nginx:1.23"))
            .unwrap();
        let pod: Pod = doc.typed().unwrap();
        assert_eq!(
            pod.spec.unwrap().containers[0].image.as_deref(),
            Some("nginx:1.23")
        );
    }

    #[test]
    fn set_creates_missing_mappings() {
        let mut doc = render_pvc_claim("claim1", "fast", 1).unwrap();
        doc.set("metadata.labels.team", Scalar::from("storage"))
            .unwrap();
        let Document::Json(value) = &doc else {
            panic!("pvc claim is a json document");
        };
        assert_eq!(value["metadata"]["labels"]["team"], "storage");
    }

    #[test]
    fn set_rejects_out_of_range_index() {
        let mut doc = render_app_pod("nginx1", "claim1", "nginx").unwrap();
        let err = doc
            .set("spec.containers.7.image", Scalar::from("nginx"))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Patch { .. }));
    }

    #[test]
    fn set_rejects_scalar_mid_path() {
        let mut doc = render_pvc_claim("claim1", "fast", 1).unwrap();
        let err = doc
            .set("metadata.name.inner", Scalar::from("x"))
            .unwrap_err();
        assert!(matches!(err, ProbeError::Patch { .. }));
    }

    #[test]
    fn renders_are_isolated_copies() {
        let mut first = render_storage_class("fast", "http://h", "kubernetes.io/glusterfs").unwrap();
        let second = render_storage_class("fast", "http://h", "kubernetes.io/glusterfs").unwrap();
        first.set("parameters.hacount", Scalar::from("3")).unwrap();
        let second_class: StorageClass = second.typed().unwrap();
        assert!(!second_class.parameters.unwrap().contains_key("hacount"));
    }

    #[test]
    fn mongodb_template_carries_storage_class_annotation() {
        let doc = render_mongodb_app("fast").unwrap();
        let Document::Json(value) = &doc else {
            panic!("mongodb app is a json document");
        };
        assert_eq!(value["objects"][1]["kind"], "PersistentVolumeClaim");
        assert_eq!(
            value["objects"][1]["metadata"]["annotations"]
                ["volume.beta.kubernetes.io/storage-class"],
            "fast"
        );
    }
}
