//! Settings from `spec.global` that apply to every component.
//!
//! They are layered on the default templates before any feature hook runs,
//! so features and overrides can still refine them.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, Secret, SecretKeySelector};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::credentials::Credentials;
use crate::crd::{AgentContainerName, ComponentName, DatadogAgent};
use crate::feature::Result;
use crate::feature::shared::{json_env_var, split_socket_path};
use crate::images::with_registry;
use crate::merger::env::{bool_env_var, env_var};
use crate::merger::volume::{host_path_volume, host_path_volume_with_type};
use crate::merger::{PodTemplateManagers, ResourceManagers};
use crate::resources::common::{credentials_secret_name, token_secret_name};
use crate::resources::volumes::{
    CRI_SOCKET_VOLUME_NAME, HOST_CRI_SOCKET_PATH_PREFIX, RUNTIME_DIR_VOLUME_PATH,
};

pub const DD_CLUSTER_NAME: &str = "DD_CLUSTER_NAME";
pub const DD_SITE: &str = "DD_SITE";
pub const DD_DD_URL: &str = "DD_DD_URL";
pub const DD_LOG_LEVEL: &str = "DD_LOG_LEVEL";
pub const DD_TAGS: &str = "DD_TAGS";
pub const DD_API_KEY: &str = "DD_API_KEY";
pub const DD_APP_KEY: &str = "DD_APP_KEY";
pub const DD_CLUSTER_AGENT_AUTH_TOKEN: &str = "DD_CLUSTER_AGENT_AUTH_TOKEN";
pub const DOCKER_HOST: &str = "DOCKER_HOST";
pub const DD_CRI_SOCKET_PATH: &str = "DD_CRI_SOCKET_PATH";
pub const DD_KUBELET_TLS_VERIFY: &str = "DD_KUBELET_TLS_VERIFY";
pub const DD_KUBELET_CLIENT_CA: &str = "DD_KUBELET_CLIENT_CA";

pub const DEFAULT_SITE: &str = "datadoghq.com";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const API_KEY_SECRET_KEY: &str = "api_key";
pub const APP_KEY_SECRET_KEY: &str = "app_key";
pub const TOKEN_SECRET_KEY: &str = "token";
pub const KUBELET_CA_VOLUME_NAME: &str = "kubelet-ca";
pub const DEFAULT_KUBELET_AGENT_CA_PATH: &str = "/var/run/host-kubelet-ca.crt";
const GENERATED_TOKEN_LENGTH: usize = 32;

/// Node agent containers that talk to the container runtime.
const RUNTIME_CONTAINERS: [AgentContainerName; 4] = [
    AgentContainerName::CoreAgent,
    AgentContainerName::TraceAgent,
    AgentContainerName::ProcessAgent,
    AgentContainerName::SecurityAgent,
];

/// Inputs the global settings need besides the DatadogAgent.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalOptions<'a> {
    /// Whether the cluster agent is deployed, so agents authenticate to it.
    pub cluster_agent_enabled: bool,
    /// Whether the node agent runs in the single unprivileged container.
    pub single_container: bool,
    /// Operator credentials used when the DatadogAgent has none.
    pub fallback_credentials: Option<&'a Credentials>,
}

/// Apply global settings to the template of `component`.
pub fn apply_global_settings(
    dda: &DatadogAgent,
    component: ComponentName,
    managers: &mut PodTemplateManagers,
    options: &GlobalOptions<'_>,
) -> Result<()> {
    let global = &dda.spec.global;
    let mut env = managers.env_var();

    if let Some(cluster_name) = &global.cluster_name {
        env.add_env_var(env_var(DD_CLUSTER_NAME, cluster_name.as_str()));
    }
    env.add_env_var(env_var(
        DD_SITE,
        global.site.as_deref().unwrap_or(DEFAULT_SITE),
    ));
    if let Some(url) = global.endpoint.as_ref().and_then(|e| e.url.as_ref()) {
        env.add_env_var(env_var(DD_DD_URL, url.as_str()));
    }
    env.add_env_var(env_var(
        DD_LOG_LEVEL,
        global.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL),
    ));
    if !global.tags.is_empty() {
        env.add_env_var(json_env_var(DD_TAGS, &global.tags)?);
    }

    if let Some((secret, key)) = api_key_ref(dda, options.fallback_credentials) {
        env.add_env_var(secret_env_var(DD_API_KEY, &secret, &key));
    }
    if let Some((secret, key)) = app_key_ref(dda, options.fallback_credentials) {
        env.add_env_var(secret_env_var(DD_APP_KEY, &secret, &key));
    }
    if options.cluster_agent_enabled {
        env.add_env_var(secret_env_var(
            DD_CLUSTER_AGENT_AUTH_TOKEN,
            &token_secret_name(dda),
            TOKEN_SECRET_KEY,
        ));
    }
    for extra in &global.env {
        env.add_env_var(extra.clone());
    }

    if let Some(registry) = global.registry.as_deref().filter(|r| !r.is_empty()) {
        rewrite_registry(managers, registry);
    }

    if component == ComponentName::NodeAgent {
        let targets: &[AgentContainerName] = if options.single_container {
            &[AgentContainerName::UnprivilegedSingleAgent]
        } else {
            &RUNTIME_CONTAINERS
        };
        add_runtime_socket(dda, managers, targets);
        add_kubelet_settings(dda, managers, targets);
    }
    Ok(())
}

fn secret_env_var(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Secret and key the API key is read from.
pub fn api_key_ref(
    dda: &DatadogAgent,
    fallback: Option<&Credentials>,
) -> Option<(String, String)> {
    let credentials = dda.spec.global.credentials.as_ref();
    if let Some(secret) = credentials.and_then(|c| c.api_secret.as_ref()) {
        let key = secret.key_name.as_deref().unwrap_or(API_KEY_SECRET_KEY);
        return Some((secret.secret_name.clone(), key.to_string()));
    }
    let inline = credentials.and_then(|c| c.api_key.as_ref()).is_some();
    (inline || fallback.is_some())
        .then(|| (credentials_secret_name(dda), API_KEY_SECRET_KEY.to_string()))
}

/// Secret and key the application key is read from, if there is one.
pub fn app_key_ref(
    dda: &DatadogAgent,
    fallback: Option<&Credentials>,
) -> Option<(String, String)> {
    let credentials = dda.spec.global.credentials.as_ref();
    if let Some(secret) = credentials.and_then(|c| c.app_secret.as_ref()) {
        let key = secret.key_name.as_deref().unwrap_or(APP_KEY_SECRET_KEY);
        return Some((secret.secret_name.clone(), key.to_string()));
    }
    let inline = credentials.and_then(|c| c.app_key.as_ref()).is_some();
    let from_fallback = fallback.is_some_and(|c| !c.app_key.is_empty());
    (inline || from_fallback)
        .then(|| (credentials_secret_name(dda), APP_KEY_SECRET_KEY.to_string()))
}

fn rewrite_registry(managers: &mut PodTemplateManagers, registry: &str) {
    let spec = managers.pod_spec_mut();
    let containers = spec
        .containers
        .iter_mut()
        .chain(spec.init_containers.iter_mut().flatten());
    for container in containers {
        if let Some(image) = container.image.as_mut() {
            *image = with_registry(image, registry);
        }
    }
}

/// Mount the container runtime socket directory and tell the agents where
/// the socket is.
fn add_runtime_socket(
    dda: &DatadogAgent,
    managers: &mut PodTemplateManagers,
    targets: &[AgentContainerName],
) {
    let global = &dda.spec.global;
    let (host_dir, socket_env) = if let Some(docker) = &global.docker_socket_path {
        let (dir, _) = split_socket_path(docker);
        (
            dir.to_string(),
            Some(env_var(
                DOCKER_HOST,
                format!("unix://{HOST_CRI_SOCKET_PATH_PREFIX}{docker}"),
            )),
        )
    } else if let Some(cri) = &global.cri_socket_path {
        let (dir, _) = split_socket_path(cri);
        (
            dir.to_string(),
            Some(env_var(
                DD_CRI_SOCKET_PATH,
                format!("{HOST_CRI_SOCKET_PATH_PREFIX}{cri}"),
            )),
        )
    } else {
        (RUNTIME_DIR_VOLUME_PATH.to_string(), None)
    };

    let (volume, mount) = host_path_volume(
        CRI_SOCKET_VOLUME_NAME,
        &host_dir,
        &format!("{HOST_CRI_SOCKET_PATH_PREFIX}{host_dir}"),
        true,
    );
    managers.volume().add_volume(volume);
    managers
        .volume_mount()
        .add_volume_mount_to_containers(mount, targets);
    if let Some(socket_env) = socket_env {
        managers
            .env_var()
            .add_env_var_to_containers(targets, socket_env);
    }
}

fn add_kubelet_settings(
    dda: &DatadogAgent,
    managers: &mut PodTemplateManagers,
    targets: &[AgentContainerName],
) {
    let Some(kubelet) = dda.spec.global.kubelet.as_ref() else {
        return;
    };
    if let Some(verify) = kubelet.tls_verify {
        managers
            .env_var()
            .add_env_var_to_containers(targets, bool_env_var(DD_KUBELET_TLS_VERIFY, verify));
    }
    if let Some(host_ca) = kubelet.host_ca_path.as_deref() {
        let agent_ca = kubelet
            .agent_ca_path
            .as_deref()
            .unwrap_or(DEFAULT_KUBELET_AGENT_CA_PATH);
        let (volume, mount) = host_path_volume_with_type(
            KUBELET_CA_VOLUME_NAME,
            host_ca,
            agent_ca,
            true,
            Some("File"),
        );
        managers.volume().add_volume(volume);
        managers
            .volume_mount()
            .add_volume_mount_to_containers(mount, targets);
        managers
            .env_var()
            .add_env_var_to_containers(targets, env_var(DD_KUBELET_CLIENT_CA, agent_ca));
    }
}

/// Token shared by the agents and the cluster agent.
///
/// An explicit token wins, then the one already stored in the token
/// Secret. A fresh random token is generated only when neither exists.
pub fn resolve_cluster_agent_token(dda: &DatadogAgent, existing: Option<&str>) -> String {
    if let Some(token) = dda
        .spec
        .global
        .cluster_agent_token
        .as_deref()
        .filter(|t| !t.is_empty())
    {
        return token.to_string();
    }
    if let Some(token) = existing.filter(|t| !t.is_empty()) {
        return token.to_string();
    }
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Add the credentials and token Secrets.
pub fn add_global_dependencies(
    dda: &DatadogAgent,
    managers: &mut ResourceManagers,
    options: &GlobalOptions<'_>,
    cluster_agent_token: &str,
) {
    let namespace = dda.namespace().unwrap_or_default();
    let credentials = dda.spec.global.credentials.as_ref();
    let fallback = options.fallback_credentials;

    let mut data = BTreeMap::new();
    let api_key = credentials
        .filter(|c| c.api_secret.is_none())
        .and_then(|c| c.api_key.clone())
        .or_else(|| {
            credentials
                .is_none_or(|c| c.api_secret.is_none() && c.api_key.is_none())
                .then(|| fallback.map(|f| f.api_key.clone()))
                .flatten()
        });
    if let Some(api_key) = api_key {
        data.insert(API_KEY_SECRET_KEY.to_string(), ByteString(api_key.into_bytes()));
    }
    let app_key = credentials
        .filter(|c| c.app_secret.is_none())
        .and_then(|c| c.app_key.clone())
        .or_else(|| {
            credentials
                .is_none_or(|c| c.app_secret.is_none() && c.app_key.is_none())
                .then(|| fallback.map(|f| f.app_key.clone()).filter(|k| !k.is_empty()))
                .flatten()
        });
    if let Some(app_key) = app_key {
        data.insert(APP_KEY_SECRET_KEY.to_string(), ByteString(app_key.into_bytes()));
    }
    if !data.is_empty() {
        managers
            .store()
            .add_or_update(opaque_secret(&credentials_secret_name(dda), &namespace, data));
    }

    if options.cluster_agent_enabled {
        let data = BTreeMap::from([(
            TOKEN_SECRET_KEY.to_string(),
            ByteString(cluster_agent_token.as_bytes().to_vec()),
        )]);
        managers
            .store()
            .add_or_update(opaque_secret(&token_secret_name(dda), &namespace, data));
    }
}

fn opaque_secret(name: &str, namespace: &str, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}
