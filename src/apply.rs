use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use log::{error, info};

use crate::error::ProbeError;
use crate::manifest::{self, Document, FieldOverride, Scalar};
use crate::remote::{ChannelProvider, RemoteChannel, RemoteTarget};

/// Storage class definition, optional provisioner parameters enumerated
/// explicitly instead of an open-ended attribute bag.
#[derive(Debug, Clone, Default)]
pub struct StorageClassSpec {
    pub name: String,
    pub resturl: String,
    pub provisioner: String,
    pub restuser: Option<String>,
    pub hacount: Option<u32>,
    pub clusterids: Option<String>,
    pub chapauthenabled: Option<bool>,
    pub restauthenabled: Option<bool>,
    pub secretnamespace: Option<String>,
    pub secretname: Option<String>,
    pub restsecretnamespace: Option<String>,
    pub restsecretname: Option<String>,
}

impl StorageClassSpec {
    /// Populated optional parameters, as string values the way the cluster
    /// expects them.
    fn parameters(&self) -> Vec<(&'static str, String)> {
        let mut parameters = Vec::new();
        if let Some(ref value) = self.restuser {
            parameters.push(("restuser", value.clone()));
        }
        if let Some(value) = self.hacount {
            parameters.push(("hacount", value.to_string()));
        }
        if let Some(ref value) = self.clusterids {
            parameters.push(("clusterids", value.clone()));
        }
        if let Some(value) = self.chapauthenabled {
            parameters.push(("chapauthenabled", value.to_string()));
        }
        if let Some(value) = self.restauthenabled {
            parameters.push(("restauthenabled", value.to_string()));
        }
        if let Some(ref value) = self.secretnamespace {
            parameters.push(("secretnamespace", value.clone()));
        }
        if let Some(ref value) = self.secretname {
            parameters.push(("secretname", value.clone()));
        }
        if let Some(ref value) = self.restsecretnamespace {
            parameters.push(("restsecretnamespace", value.clone()));
        }
        if let Some(ref value) = self.restsecretname {
            parameters.push(("restsecretname", value.clone()));
        }
        parameters
    }

    /// File name layout: `/<name>-<provisioner suffix>-storage-class.yaml`.
    fn remote_path(&self) -> String {
        let suffix = self
            .provisioner
            .rsplit('/')
            .next()
            .unwrap_or(self.provisioner.as_str());
        format!("/{}-{}-storage-class.yaml", self.name, suffix)
    }
}

#[derive(Debug, Clone)]
pub struct SecretSpec {
    pub name: String,
    pub namespace: String,
    pub data_key: String,
    pub secret_type: String,
}

fn apply_overrides(doc: &mut Document, overrides: &[FieldOverride]) -> Result<(), ProbeError> {
    for field in overrides {
        doc.set(&field.path, field.value.clone())?;
    }
    Ok(())
}

/// Connect, serialize, write, release. The channel is released exactly once
/// on every path after a successful connect; a failed connect writes
/// nothing. Partial writes on a dying channel are possible, the channel
/// semantics govern atomicity.
async fn materialize(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    path: &str,
    doc: &Document,
) -> Result<(), ProbeError> {
    let mut channel = provider.connect(target).await?;
    let result = match doc.to_bytes() {
        Ok(bytes) => channel.write_file(path, &bytes).await,
        Err(err) => Err(err),
    };
    channel.close().await;
    result
}

/// Render a pvc claim manifest and push it to `/<claim_name>.json` on the
/// target node. Soft-fails: every error is logged and reported as `false`.
pub async fn create_pvc_file(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    claim_name: &str,
    storage_class: &str,
    size_gib: u64,
    overrides: &[FieldOverride],
) -> bool {
    let doc = match pvc_doc(claim_name, storage_class, size_gib, overrides) {
        Ok(doc) => doc,
        Err(err) => {
            error!("failed to render pvc claim {}: {}", claim_name, err);
            return false;
        }
    };
    let path = format!("/{}.json", claim_name);
    match materialize(provider, target, &path, &doc).await {
        Ok(()) => {
            info!("creation of pvc file {} on {} successful", path, target.host);
            true
        }
        Err(err) => {
            error!(
                "failed to create pvc file {} on {}: {}",
                path, target.host, err
            );
            false
        }
    }
}

fn pvc_doc(
    claim_name: &str,
    storage_class: &str,
    size_gib: u64,
    overrides: &[FieldOverride],
) -> Result<Document, ProbeError> {
    let mut doc = manifest::render_pvc_claim(claim_name, storage_class, size_gib)?;
    apply_overrides(&mut doc, overrides)?;
    doc.typed::<PersistentVolumeClaim>()?;
    Ok(doc)
}

/// Render an app pod manifest bound to an existing claim and push it to
/// `/<app_name>.yaml` on the target node.
pub async fn create_app_pod_file(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    claim_name: &str,
    app_name: &str,
    image: &str,
    overrides: &[FieldOverride],
) -> bool {
    let doc = match pod_doc(app_name, claim_name, image, overrides) {
        Ok(doc) => doc,
        Err(err) => {
            error!("failed to render app pod {}: {}", app_name, err);
            return false;
        }
    };
    let path = format!("/{}.yaml", app_name);
    match materialize(provider, target, &path, &doc).await {
        Ok(()) => {
            info!("creation of {} app file on {} successful", app_name, target.host);
            true
        }
        Err(err) => {
            error!(
                "failed to create app file {} on {}: {}",
                path, target.host, err
            );
            false
        }
    }
}

fn pod_doc(
    app_name: &str,
    claim_name: &str,
    image: &str,
    overrides: &[FieldOverride],
) -> Result<Document, ProbeError> {
    let mut doc = manifest::render_app_pod(app_name, claim_name, image)?;
    apply_overrides(&mut doc, overrides)?;
    doc.typed::<Pod>()?;
    Ok(doc)
}

/// Render a secret manifest and push it to `/<name>.yaml` on the target
/// node.
pub async fn create_secret_file(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    spec: &SecretSpec,
    overrides: &[FieldOverride],
) -> bool {
    let doc = match secret_doc(spec, overrides) {
        Ok(doc) => doc,
        Err(err) => {
            error!("failed to render secret {}: {}", spec.name, err);
            return false;
        }
    };
    let path = format!("/{}.yaml", spec.name);
    match materialize(provider, target, &path, &doc).await {
        Ok(()) => {
            info!(
                "creation of {}.yaml file on {} successful",
                spec.name, target.host
            );
            true
        }
        Err(err) => {
            error!(
                "failed to create {}.yaml file on {}: {}",
                spec.name, target.host, err
            );
            false
        }
    }
}

fn secret_doc(spec: &SecretSpec, overrides: &[FieldOverride]) -> Result<Document, ProbeError> {
    let mut doc =
        manifest::render_secret(&spec.name, &spec.namespace, &spec.data_key, &spec.secret_type)?;
    apply_overrides(&mut doc, overrides)?;
    doc.typed::<Secret>()?;
    Ok(doc)
}

/// Render a storage class manifest, apply the populated optional
/// parameters, and push it to the target node.
pub async fn create_storage_class_file(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    spec: &StorageClassSpec,
    overrides: &[FieldOverride],
) -> bool {
    let doc = match storage_class_doc(spec, overrides) {
        Ok(doc) => doc,
        Err(err) => {
            error!("failed to render storage class {}: {}", spec.name, err);
            return false;
        }
    };
    let path = spec.remote_path();
    match materialize(provider, target, &path, &doc).await {
        Ok(()) => {
            info!(
                "creation of {} storage-class file on {} successful",
                spec.name, target.host
            );
            true
        }
        Err(err) => {
            error!(
                "failed to create storage-class file {} on {}: {}",
                path, target.host, err
            );
            false
        }
    }
}

fn storage_class_doc(
    spec: &StorageClassSpec,
    overrides: &[FieldOverride],
) -> Result<Document, ProbeError> {
    let mut doc = manifest::render_storage_class(&spec.name, &spec.resturl, &spec.provisioner)?;
    for (key, value) in spec.parameters() {
        doc.set(&format!("parameters.{}", key), Scalar::from(value))?;
    }
    apply_overrides(&mut doc, overrides)?;
    doc.typed::<StorageClass>()?;
    Ok(doc)
}

/// Push the mongodb application template to `/<pvc_name>.json` on the
/// target node and launch it through `oc new-app`, all over one channel.
pub async fn deploy_mongodb_app(
    provider: &dyn ChannelProvider,
    target: &RemoteTarget,
    pvc_name: &str,
    size_gib: u64,
    storage_class: &str,
    overrides: &[FieldOverride],
) -> bool {
    let doc = match mongodb_doc(storage_class, overrides) {
        Ok(doc) => doc,
        Err(err) => {
            error!("failed to render mongodb template: {}", err);
            return false;
        }
    };
    let path = format!("/{}.json", pvc_name);
    let command = format!(
        "oc new-app {} --param=DATABASE_SERVICE_NAME={} --param=VOLUME_CAPACITY={}Gi",
        path, pvc_name, size_gib
    );

    let mut channel = match provider.connect(target).await {
        Ok(channel) => channel,
        Err(err) => {
            error!("failed to deploy mongodb app on {}: {}", target.host, err);
            return false;
        }
    };
    let result = push_and_launch(channel.as_mut(), &path, &doc, &command).await;
    channel.close().await;
    match result {
        Ok(()) => {
            info!("creation of mongodb app {} successful", pvc_name);
            true
        }
        Err(err) => {
            error!("failed to deploy mongodb app on {}: {}", target.host, err);
            false
        }
    }
}

fn mongodb_doc(storage_class: &str, overrides: &[FieldOverride]) -> Result<Document, ProbeError> {
    let mut doc = manifest::render_mongodb_app(storage_class)?;
    apply_overrides(&mut doc, overrides)?;
    Ok(doc)
}

async fn push_and_launch(
    channel: &mut dyn RemoteChannel,
    path: &str,
    doc: &Document,
    command: &str,
) -> Result<(), ProbeError> {
    let bytes = doc.to_bytes()?;
    channel.write_file(path, &bytes).await?;
    let output = channel.run(command).await?;
    if !output.success() {
        return Err(ProbeError::Command {
            command: command.to_string(),
            code: output.code,
            stderr: output.stderr,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::{failure, stdout, MockProvider};

    fn target() -> RemoteTarget {
        RemoteTarget::new("master.example.com", "root")
    }

    #[tokio::test]
    async fn unreachable_host_yields_failure_and_zero_writes() {
        let (provider, state) = MockProvider::new();
        state.lock().unwrap().fail_connect = true;
        let created = create_pvc_file(&provider, &target(), "claim1", "fast", 10, &[]).await;
        assert!(!created);
        let state = state.lock().unwrap();
        assert!(state.writes.is_empty());
        assert_eq!(state.closes, 0);
    }

    #[tokio::test]
    async fn pvc_file_lands_on_expected_path() {
        let (provider, state) = MockProvider::new();
        let created = create_pvc_file(&provider, &target(), "claim1", "fast", 10, &[]).await;
        assert!(created);
        let state = state.lock().unwrap();
        assert_eq!(state.writes.len(), 1);
        let (path, bytes) = &state.writes[0];
        assert_eq!(path, "/claim1.json");
        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(value["metadata"]["name"], "claim1");
        assert_eq!(
            value["metadata"]["annotations"]["volume.beta.kubernetes.io/storage-class"],
            "fast"
        );
        assert_eq!(value["spec"]["resources"]["requests"]["storage"], "10Gi");
        // downstream tooling is sensitive to key order
        assert!(bytes.starts_with(b"{\n    \"kind\": \"PersistentVolumeClaim\""));
        assert_eq!(state.closes, 1);
    }

    #[tokio::test]
    async fn write_failure_still_releases_channel_once() {
        let (provider, state) = MockProvider::new();
        state.lock().unwrap().fail_write = true;
        let created = create_pvc_file(&provider, &target(), "claim1", "fast", 10, &[]).await;
        assert!(!created);
        let state = state.lock().unwrap();
        assert_eq!(state.connects, 1);
        assert_eq!(state.closes, 1);
        assert!(state.writes.is_empty());
    }

    #[tokio::test]
    async fn invalid_override_renders_nothing_and_never_connects() {
        let (provider, state) = MockProvider::new();
        let overrides = vec![FieldOverride {
            path: "spec.accessModes.7".to_string(),
            value: Scalar::from("ReadWriteMany"),
        }];
        let created =
            create_pvc_file(&provider, &target(), "claim1", "fast", 10, &overrides).await;
        assert!(!created);
        let state = state.lock().unwrap();
        assert_eq!(state.connects, 0);
        assert_eq!(state.closes, 0);
    }

    #[tokio::test]
    async fn storage_class_overrides_do_not_leak_between_calls() {
        let (provider, state) = MockProvider::new();
        let first = StorageClassSpec {
            name: "fast".to_string(),
            resturl: "http://heketi".to_string(),
            provisioner: "kubernetes.io/glusterfs".to_string(),
            hacount: Some(3),
            restuser: Some("admin".to_string()),
            ..Default::default()
        };
        let second = StorageClassSpec {
            name: "fast".to_string(),
            resturl: "http://heketi".to_string(),
            provisioner: "kubernetes.io/glusterfs".to_string(),
            ..Default::default()
        };
        assert!(create_storage_class_file(&provider, &target(), &first, &[]).await);
        assert!(create_storage_class_file(&provider, &target(), &second, &[]).await);
        let state = state.lock().unwrap();
        assert_eq!(state.writes.len(), 2);
        assert_eq!(state.writes[0].0, "/fast-glusterfs-storage-class.yaml");
        let first_doc: serde_yaml::Value = serde_yaml::from_slice(&state.writes[0].1).unwrap();
        let second_doc: serde_yaml::Value = serde_yaml::from_slice(&state.writes[1].1).unwrap();
        assert_eq!(first_doc["parameters"]["hacount"], "3");
        assert!(second_doc["parameters"].get("hacount").is_none());
        assert_eq!(second_doc["parameters"]["resturl"], "http://heketi");
    }

    #[tokio::test]
    async fn app_pod_file_lands_on_expected_path() {
        let (provider, state) = MockProvider::new();
        let created =
            create_app_pod_file(&provider, &target(), "claim1", "nginx1", "nginx", &[]).await;
        assert!(created);
        let state = state.lock().unwrap();
        assert_eq!(state.writes[0].0, "/nginx1.yaml");
        let doc: serde_yaml::Value = serde_yaml::from_slice(&state.writes[0].1).unwrap();
        assert_eq!(doc["metadata"]["name"], "nginx1");
        assert_eq!(
            doc["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "claim1"
        );
    }

    #[tokio::test]
    async fn mongodb_deploy_runs_new_app_on_same_channel() {
        let (provider, state) = MockProvider::new();
        state.lock().unwrap().outputs.push_back(stdout(""));
        let deployed =
            deploy_mongodb_app(&provider, &target(), "pvc-claim1", 10, "fast", &[]).await;
        assert!(deployed);
        let state = state.lock().unwrap();
        assert_eq!(state.connects, 1);
        assert_eq!(state.closes, 1);
        assert_eq!(state.writes[0].0, "/pvc-claim1.json");
        assert_eq!(
            state.commands[0],
            "oc new-app /pvc-claim1.json --param=DATABASE_SERVICE_NAME=pvc-claim1 \
             --param=VOLUME_CAPACITY=10Gi"
        );
    }

    #[tokio::test]
    async fn mongodb_deploy_fails_on_command_error_and_releases_channel() {
        let (provider, state) = MockProvider::new();
        state
            .lock()
            .unwrap()
            .outputs
            .push_back(failure(1, "error: already exists"));
        let deployed =
            deploy_mongodb_app(&provider, &target(), "pvc-claim1", 10, "fast", &[]).await;
        assert!(!deployed);
        let state = state.lock().unwrap();
        assert_eq!(state.writes.len(), 1);
        assert_eq!(state.closes, 1);
    }
}
