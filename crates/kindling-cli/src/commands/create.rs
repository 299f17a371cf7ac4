use super::{connect, describe, json_pretty, status_sink, EXIT_SUCCESS};
use kindling_config::{parse_config_file, ClusterConfig};
use kindling_core::{create_cluster, CreateOptions};
use std::path::Path;
use std::time::Duration;

pub struct Args<'a> {
    pub name: Option<&'a str>,
    pub config: Option<&'a Path>,
    pub image: Option<&'a str>,
    pub retain: bool,
    pub wait: Duration,
    pub kubeconfig: Option<&'a Path>,
}

pub fn run(args: &Args<'_>, json: bool) -> Result<u8, String> {
    let config = match args.config {
        Some(path) => parse_config_file(path).map_err(|e| e.to_string())?,
        None => ClusterConfig::default(),
    };
    let provider = connect()?;

    let opts = CreateOptions {
        config,
        name: args.name.map(str::to_owned),
        node_image: args.image.map(str::to_owned),
        retain: args.retain,
        wait: args.wait,
        kubeconfig: args.kubeconfig.map(Path::to_path_buf),
        stop_before_kubernetes: false,
    };
    if !json {
        let name = args.name.unwrap_or(opts.config.cluster_name());
        println!("Creating cluster \"{name}\" with {} ...", provider.name());
    }

    let status = status_sink(json);
    let created =
        create_cluster(provider.as_ref(), &opts, status.as_ref()).map_err(|e| describe(&e))?;

    if json {
        println!("{}", json_pretty(&created)?);
    } else {
        let context = created.context.as_deref().unwrap_or_default();
        let kubeconfig = created
            .kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("Set kubectl context to \"{context}\" in {kubeconfig}");
        println!("You can now use your cluster with:\n");
        println!("kubectl cluster-info --context {context}");
    }
    Ok(EXIT_SUCCESS)
}
