use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};

use crate::apply::{SecretSpec, StorageClassSpec};
use crate::manifest::{FieldOverride, Scalar};
use crate::remote::{RemoteTarget, SshProvider};

mod apply;
mod error;
mod manifest;
mod remote;
mod status;
mod waiter;

#[derive(Parser)]
#[command(name = "pvc-probe")]
#[command(version = "0.1")]
#[command(arg_required_else_help = true)]
#[command(about = "Validate dynamic storage provisioning against a remote cluster", long_about = None)]
struct App {
    #[arg(long, global = true, env = "PVC_PROBE_HOST")]
    #[arg(help = "cluster node to drive, reachable over ssh")]
    host: Option<String>,
    #[arg(long, global = true, env = "PVC_PROBE_USER", default_value = "root")]
    #[arg(help = "remote user for the ssh channel")]
    user: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Render a pvc claim manifest and push it to the node", long_about = None)]
    CreatePvc(CommandCreatePvc),
    #[command(about = "Render an app pod manifest bound to a claim and push it to the node", long_about = None)]
    CreatePod(CommandCreatePod),
    #[command(about = "Render a secret manifest and push it to the node", long_about = None)]
    CreateSecret(CommandCreateSecret),
    #[command(about = "Render a storage class manifest and push it to the node", long_about = None)]
    CreateStorageClass(Box<CommandCreateStorageClass>),
    #[command(about = "Push the mongodb app template and launch it with oc new-app", long_about = None)]
    DeployMongodb(CommandDeployMongodb),
    #[command(about = "Poll until a pod reaches Running or the timeout expires", long_about = None)]
    WaitPod(CommandWaitPod),
    #[command(about = "Poll until a pvc reaches Bound or the timeout expires", long_about = None)]
    WaitPvc(CommandWaitPvc),
    #[command(about = "Print the current phase of a pvc", long_about = None)]
    PvcStatus(CommandPvcStatus),
}

#[derive(Args)]
struct CommandCreatePvc {
    #[arg(long)]
    #[arg(help = "name of the claim, for example: storage-claim1")]
    claim_name: String,
    #[arg(long)]
    #[arg(help = "storage class backing the claim")]
    storage_class: String,
    #[arg(long)]
    #[arg(help = "claim size in GiB")]
    size: u64,
    #[arg(long = "set", value_parser = parse_override)]
    #[arg(help = "extra field override in <path>=<value> form, can be specified multiple times")]
    set: Vec<FieldOverride>,
}

#[derive(Args)]
struct CommandCreatePod {
    #[arg(long)]
    #[arg(help = "name of the claim the pod mounts")]
    claim_name: String,
    #[arg(long)]
    #[arg(help = "name of the app pod to create, for example: nginx1")]
    app_name: String,
    #[arg(long, default_value = "nginx")]
    #[arg(help = "container image for the app pod")]
    image: String,
    #[arg(long = "set", value_parser = parse_override)]
    #[arg(help = "extra field override in <path>=<value> form, can be specified multiple times")]
    set: Vec<FieldOverride>,
}

#[derive(Args)]
struct CommandCreateSecret {
    #[arg(long)]
    #[arg(help = "secret name, for example: heketi-secret")]
    secret_name: String,
    #[arg(long)]
    #[arg(help = "namespace the secret lives in, for example: storage-project")]
    namespace: String,
    #[arg(long)]
    #[arg(help = "base64 encoded data key")]
    data_key: String,
    #[arg(long)]
    #[arg(
        help = "secret type, for example: kubernetes.io/glusterfs or gluster.org/glusterblock"
    )]
    secret_type: String,
    #[arg(long = "set", value_parser = parse_override)]
    #[arg(help = "extra field override in <path>=<value> form, can be specified multiple times")]
    set: Vec<FieldOverride>,
}

#[derive(Args)]
struct CommandCreateStorageClass {
    #[arg(long)]
    #[arg(help = "storage class name, for example: fast")]
    name: String,
    #[arg(long)]
    #[arg(
        help = "rest endpoint of the provisioner, for example: http://heketi-storage-project.cloudapps.mystorage.com"
    )]
    resturl: String,
    #[arg(long)]
    #[arg(help = "provisioner, for example: kubernetes.io/glusterfs or gluster.org/glusterblock")]
    provisioner: String,
    #[arg(long)]
    #[arg(help = "rest user for the provisioner endpoint")]
    restuser: Option<String>,
    #[arg(long)]
    #[arg(help = "high availability count for block volumes")]
    hacount: Option<u32>,
    #[arg(long)]
    #[arg(help = "comma separated cluster ids to provision from")]
    clusterids: Option<String>,
    #[arg(long)]
    #[arg(help = "enable CHAP authentication for block volumes")]
    chapauthenabled: Option<bool>,
    #[arg(long)]
    #[arg(help = "enable authentication against the rest endpoint")]
    restauthenabled: Option<bool>,
    #[arg(long)]
    #[arg(help = "namespace holding the provisioner secret")]
    secretnamespace: Option<String>,
    #[arg(long)]
    #[arg(help = "name of the provisioner secret")]
    secretname: Option<String>,
    #[arg(long)]
    #[arg(help = "namespace holding the rest secret")]
    restsecretnamespace: Option<String>,
    #[arg(long)]
    #[arg(help = "name of the rest secret")]
    restsecretname: Option<String>,
    #[arg(long = "set", value_parser = parse_override)]
    #[arg(help = "extra field override in <path>=<value> form, can be specified multiple times")]
    set: Vec<FieldOverride>,
}

#[derive(Args)]
struct CommandDeployMongodb {
    #[arg(long)]
    #[arg(help = "name of the pvc the app claims, also used as the service name")]
    pvc_name: String,
    #[arg(long)]
    #[arg(help = "volume capacity in GiB")]
    size: u64,
    #[arg(long)]
    #[arg(help = "storage class backing the claim")]
    storage_class: String,
    #[arg(long = "set", value_parser = parse_override)]
    #[arg(help = "extra field override in <path>=<value> form, can be specified multiple times")]
    set: Vec<FieldOverride>,
}

#[derive(Args)]
struct CommandWaitPod {
    #[arg(long)]
    #[arg(help = "name of the pod to watch")]
    name: String,
    #[arg(long, default_value_t = 1200)]
    #[arg(help = "total polling budget in seconds")]
    timeout: u64,
    #[arg(long, default_value_t = 60)]
    #[arg(help = "seconds to sleep between attempts")]
    step: u64,
}

#[derive(Args)]
struct CommandWaitPvc {
    #[arg(long)]
    #[arg(help = "name of the claim to watch")]
    claim_name: String,
    #[arg(long, default_value_t = 120)]
    #[arg(help = "total polling budget in seconds")]
    timeout: u64,
    #[arg(long, default_value_t = 3)]
    #[arg(help = "seconds to sleep between attempts")]
    step: u64,
}

#[derive(Args)]
struct CommandPvcStatus {
    #[arg(long)]
    #[arg(help = "name of the claim to query")]
    claim_name: String,
}

fn parse_override(value: &str) -> Result<FieldOverride, String> {
    let (path, literal) = value
        .split_once('=')
        .ok_or_else(|| "expected <path>=<value>".to_string())?;
    if path.is_empty() {
        return Err("override path is empty".to_string());
    }
    Ok(FieldOverride {
        path: path.to_string(),
        value: Scalar::from_literal(literal),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let app = App::parse();
    let command = match app.command {
        Some(command) => command,
        None => return Ok(()),
    };
    let host = app
        .host
        .ok_or_else(|| anyhow!("--host is required (or set PVC_PROBE_HOST)"))?;
    let target = RemoteTarget::new(&host, &app.user);
    let provider = SshProvider;

    match command {
        Commands::CreatePvc(cmd) => {
            let created = apply::create_pvc_file(
                &provider,
                &target,
                &cmd.claim_name,
                &cmd.storage_class,
                cmd.size,
                &cmd.set,
            )
            .await;
            if !created {
                return Err(anyhow!("failed to create pvc file for {}", cmd.claim_name));
            }
        }
        Commands::CreatePod(cmd) => {
            let created = apply::create_app_pod_file(
                &provider,
                &target,
                &cmd.claim_name,
                &cmd.app_name,
                &cmd.image,
                &cmd.set,
            )
            .await;
            if !created {
                return Err(anyhow!("failed to create app pod file for {}", cmd.app_name));
            }
        }
        Commands::CreateSecret(cmd) => {
            let spec = SecretSpec {
                name: cmd.secret_name,
                namespace: cmd.namespace,
                data_key: cmd.data_key,
                secret_type: cmd.secret_type,
            };
            if !apply::create_secret_file(&provider, &target, &spec, &cmd.set).await {
                return Err(anyhow!("failed to create secret file for {}", spec.name));
            }
        }
        Commands::CreateStorageClass(cmd) => {
            let spec = StorageClassSpec {
                name: cmd.name,
                resturl: cmd.resturl,
                provisioner: cmd.provisioner,
                restuser: cmd.restuser,
                hacount: cmd.hacount,
                clusterids: cmd.clusterids,
                chapauthenabled: cmd.chapauthenabled,
                restauthenabled: cmd.restauthenabled,
                secretnamespace: cmd.secretnamespace,
                secretname: cmd.secretname,
                restsecretnamespace: cmd.restsecretnamespace,
                restsecretname: cmd.restsecretname,
            };
            if !apply::create_storage_class_file(&provider, &target, &spec, &cmd.set).await {
                return Err(anyhow!(
                    "failed to create storage-class file for {}",
                    spec.name
                ));
            }
        }
        Commands::DeployMongodb(cmd) => {
            let deployed = apply::deploy_mongodb_app(
                &provider,
                &target,
                &cmd.pvc_name,
                cmd.size,
                &cmd.storage_class,
                &cmd.set,
            )
            .await;
            if !deployed {
                return Err(anyhow!("failed to deploy mongodb app {}", cmd.pvc_name));
            }
        }
        Commands::WaitPod(cmd) => {
            let running = status::wait_for_pod_running(
                &provider,
                &target,
                &cmd.name,
                Duration::from_secs(cmd.timeout),
                Duration::from_secs(cmd.step),
            )
            .await;
            if !running {
                return Err(anyhow!(
                    "pod {} did not reach Running within {}s",
                    cmd.name,
                    cmd.timeout
                ));
            }
        }
        Commands::WaitPvc(cmd) => {
            let bound = status::wait_for_pvc_bound(
                &provider,
                &target,
                &cmd.claim_name,
                Duration::from_secs(cmd.timeout),
                Duration::from_secs(cmd.step),
            )
            .await;
            if !bound {
                return Err(anyhow!(
                    "pvc {} did not reach Bound within {}s",
                    cmd.claim_name,
                    cmd.timeout
                ));
            }
        }
        Commands::PvcStatus(cmd) => {
            let phase = status::get_pvc_status(&provider, &target, &cmd.claim_name).await?;
            println!("{}", phase);
        }
    };
    Ok(())
}
