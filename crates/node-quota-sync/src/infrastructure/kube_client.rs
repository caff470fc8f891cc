use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::infrastructure::k8s::KubernetesError;

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Report<KubernetesError>> {
    let Some(path) = kubeconfig else {
        // In-cluster service account, falling back to ~/.kube/config
        return Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to infer Kubernetes config".to_string(),
            });
    };

    let kubeconfig =
        Kubeconfig::read_from(path).change_context(KubernetesError::ConnectionFailed {
            message: format!("Failed to read kubeconfig file: {}", path.display()),
        })?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(KubernetesError::ConnectionFailed {
            message: format!("Failed to create config from kubeconfig: {}", path.display()),
        })
}

/// Builds a client and checks that the API server answers.
pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
) -> Result<Client, Report<KubernetesError>> {
    let config = load_config(kubeconfig.as_deref()).await?;
    let cluster_url = config.cluster_url.to_string();

    let client = Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })?;

    let version = client
        .apiserver_version()
        .await
        .change_context(KubernetesError::ConnectionFailed {
            message: format!("API server at {cluster_url} is not reachable"),
        })?;
    tracing::info!(
        cluster_url = %cluster_url,
        "connected to Kubernetes {}.{}",
        version.major,
        version.minor
    );

    Ok(client)
}
