pub mod gateway_client;
pub mod k8s;
pub mod kube_client;
