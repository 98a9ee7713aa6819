//! In-progress pod template of one component.

use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, VolumeMount};

use super::{
    AnnotationManager, EnvVarManager, MergePolicy, PortManager, Result, SecurityContextManager,
    VolumeManager, VolumeMountManager, merge_keyed,
};
use crate::crd::AgentContainerName;

/// The pod template of a component while features are contributing to it.
///
/// Sub-managers borrow the template mutably, so only one of them is alive
/// at a time. Env vars and volume mounts added for "every container" are
/// queued and applied by [`PodTemplateManagers::finalize`], once the final
/// container list is known.
#[derive(Clone, Debug, Default)]
pub struct PodTemplateManagers {
    pub(crate) template: PodTemplateSpec,
    pub(crate) broadcast_env: Vec<EnvVar>,
    pub(crate) broadcast_mounts: Vec<VolumeMount>,
}

impl PodTemplateManagers {
    pub fn new(template: PodTemplateSpec) -> Self {
        Self {
            template,
            broadcast_env: Vec::new(),
            broadcast_mounts: Vec::new(),
        }
    }

    pub fn env_var(&mut self) -> EnvVarManager<'_> {
        EnvVarManager { managers: self }
    }

    pub fn volume(&mut self) -> VolumeManager<'_> {
        VolumeManager { managers: self }
    }

    pub fn volume_mount(&mut self) -> VolumeMountManager<'_> {
        VolumeMountManager { managers: self }
    }

    pub fn port(&mut self) -> PortManager<'_> {
        PortManager { managers: self }
    }

    pub fn annotation(&mut self) -> AnnotationManager<'_> {
        AnnotationManager { managers: self }
    }

    pub fn security_context(&mut self) -> SecurityContextManager<'_> {
        SecurityContextManager { managers: self }
    }

    /// Raw access for changes no manager covers (security context, labels).
    pub fn pod_template_spec(&mut self) -> &mut PodTemplateSpec {
        &mut self.template
    }

    /// Read-only view of the template as it currently stands.
    pub fn template(&self) -> &PodTemplateSpec {
        &self.template
    }

    pub fn pod_spec_mut(&mut self) -> &mut PodSpec {
        self.template.spec.get_or_insert_with(PodSpec::default)
    }

    /// A container or init container by name.
    pub fn container_mut(&mut self, name: AgentContainerName) -> Option<&mut Container> {
        let spec = self.template.spec.as_mut()?;
        let wanted = name.as_str();
        if let Some(c) = spec.containers.iter_mut().find(|c| c.name == wanted) {
            return Some(c);
        }
        spec.init_containers
            .as_mut()?
            .iter_mut()
            .find(|c| c.name == wanted)
    }

    pub fn has_container(&self, name: AgentContainerName) -> bool {
        self.template.spec.as_ref().is_some_and(|spec| {
            spec.containers.iter().any(|c| c.name == name.as_str())
                || spec
                    .init_containers
                    .as_ref()
                    .is_some_and(|ics| ics.iter().any(|c| c.name == name.as_str()))
        })
    }

    /// Names of the regular containers in template order.
    pub fn container_names(&self) -> Vec<String> {
        self.template
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Apply queued broadcast items and return the finished template.
    ///
    /// Broadcast env vars reach containers and init containers; broadcast
    /// mounts reach regular containers only. Both use
    /// [`MergePolicy::KeepExisting`], so anything already set on a
    /// container stays.
    pub fn finalize(mut self) -> Result<PodTemplateSpec> {
        let env = std::mem::take(&mut self.broadcast_env);
        let mounts = std::mem::take(&mut self.broadcast_mounts);
        if let Some(spec) = self.template.spec.as_mut() {
            finalize_spec(spec, &env, &mounts)?;
        }
        Ok(self.template)
    }
}

fn finalize_spec(spec: &mut PodSpec, env: &[EnvVar], mounts: &[VolumeMount]) -> Result<()> {
    for container in spec.containers.iter_mut() {
        apply_env(container, env)?;
        if mounts.is_empty() {
            continue;
        }
        let target = container.name.clone();
        let list = container.volume_mounts.get_or_insert_with(Vec::new);
        for mount in mounts {
            merge_keyed(
                list,
                mount.clone(),
                |m: &VolumeMount| m.name.as_str(),
                MergePolicy::KeepExisting,
                "volume mount",
                &target,
            )?;
        }
    }

    if let Some(init_containers) = spec.init_containers.as_mut() {
        for container in init_containers.iter_mut() {
            apply_env(container, env)?;
        }
    }
    Ok(())
}

fn apply_env(container: &mut Container, env: &[EnvVar]) -> Result<()> {
    if env.is_empty() {
        return Ok(());
    }
    let target = container.name.clone();
    let list = container.env.get_or_insert_with(Vec::new);
    for var in env {
        merge_keyed(
            list,
            var.clone(),
            |e: &EnvVar| e.name.as_str(),
            MergePolicy::KeepExisting,
            "env var",
            &target,
        )?;
    }
    Ok(())
}
