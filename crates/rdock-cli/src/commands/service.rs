//! Service command implementations

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use rdock_core::service::{ServiceConfig, ServiceKind, ServiceSpec, ServiceStatus};
use rdock_core::ConnectionKey;

use crate::output::{
    format_connection_info, format_logs, format_service, format_services, print_error,
    print_info, print_success,
};
use crate::runtime::Runtime;

/// Parameters of `rdock service create`
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: String,
    pub image: String,
    /// Inferred from the image when absent
    pub kind: Option<ServiceKind>,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// `SOURCE:TARGET` pairs
    pub volumes: Vec<String>,
    pub command: Vec<String>,
    /// Block until the deployment finished and report its outcome
    pub wait: bool,
}

impl CreateOptions {
    fn into_spec(self) -> Result<ServiceSpec> {
        let kind = self
            .kind
            .unwrap_or_else(|| ServiceKind::infer_from_image(&self.image));
        let mut config = ServiceConfig::new(self.image, kind);
        config.command = self.command;
        config.env = parse_pairs(&self.env, '=', "environment variable")?;
        config.volumes = parse_pairs(&self.volumes, ':', "volume")?;
        Ok(ServiceSpec::new(self.name, config))
    }
}

fn parse_pairs(items: &[String], separator: char, what: &str) -> Result<BTreeMap<String, String>> {
    items
        .iter()
        .map(|item| match item.split_once(separator) {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("Invalid {} '{}', expected KEY{}VALUE", what, item, separator),
        })
        .collect()
}

fn parse_target(target: &str) -> Result<ConnectionKey> {
    ConnectionKey::parse(target).with_context(|| format!("Invalid target: {}", target))
}

/// List managed services
pub async fn service_list(runtime: &Runtime, long: bool) -> Result<()> {
    let services = runtime.manager().list().await;
    println!("{}", format_services(&services, long));
    Ok(())
}

/// Show one service
pub async fn service_get(runtime: &Runtime, id: &str, json: bool) -> Result<()> {
    let service = runtime.manager().get(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&service)?);
    } else {
        print!("{}", format_service(&service));
    }
    Ok(())
}

/// Create a service on `target`
pub async fn service_create(runtime: &Runtime, target: &str, options: CreateOptions) -> Result<()> {
    let key = parse_target(target)?;
    let wait = options.wait;
    let spec = options.into_spec()?;

    let created = runtime
        .manager()
        .create(runtime.remote(key), spec)
        .await
        .context("Failed to create service")?;
    print_info(&format!(
        "Deploying {} service {} on port {}",
        created.kind(),
        created.id,
        created.port
    ));

    if !wait {
        println!("{}", created.id);
        return Ok(());
    }

    runtime.manager().wait_for_deployments().await;
    let service = runtime.manager().get(&created.id).await?;
    match service.status {
        ServiceStatus::Running => {
            print_success(&format!("Service {} is running", service.id));
            Ok(())
        }
        status => {
            print_error(&format!("Service {} ended up {}", service.id, status));
            bail!("Deployment of {} failed", service.id)
        }
    }
}

pub async fn service_start(runtime: &Runtime, target: &str, id: &str) -> Result<()> {
    let remote = runtime.remote(parse_target(target)?);
    let service = runtime.manager().start(remote.as_ref(), id).await?;
    print_success(&format!("Service {} is {}", service.id, service.status));
    Ok(())
}

pub async fn service_stop(runtime: &Runtime, target: &str, id: &str) -> Result<()> {
    let remote = runtime.remote(parse_target(target)?);
    let service = runtime.manager().stop(remote.as_ref(), id).await?;
    print_success(&format!("Service {} is {}", service.id, service.status));
    Ok(())
}

pub async fn service_delete(runtime: &Runtime, target: &str, id: &str) -> Result<()> {
    let remote = runtime.remote(parse_target(target)?);
    runtime.manager().delete(remote.as_ref(), id).await?;
    print_success(&format!("Deleted service {}", id));
    Ok(())
}

pub async fn service_logs(
    runtime: &Runtime,
    target: &str,
    id: &str,
    lines: Option<usize>,
) -> Result<()> {
    let remote = runtime.remote(parse_target(target)?);
    let entries = runtime.manager().logs(remote.as_ref(), id, lines).await?;
    println!("{}", format_logs(&entries));
    Ok(())
}

/// Connection details of one running service, or of all of them
pub async fn service_info(
    runtime: &Runtime,
    target: &str,
    id: Option<&str>,
    json: bool,
) -> Result<()> {
    let remote = runtime.remote(parse_target(target)?);
    let infos = match id {
        Some(id) => vec![runtime.manager().connection_info(remote.as_ref(), id).await?],
        None => runtime.manager().all_connection_info(remote.as_ref()).await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else if infos.is_empty() {
        println!("No running services");
    } else {
        let rendered: Vec<String> = infos.iter().map(format_connection_info).collect();
        println!("{}", rendered.join("\n"));
    }
    Ok(())
}
