//! Batch script rendering and `sbatch` output parsing.

use std::path::Path;

use api_types::IMAGE_ROOT_ANNOTATION;
use api_types::SLURM_FLAGS_ANNOTATION;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

/// Quote `value` for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '+' | '@')
        });
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Image reference handed to the execution tool.
///
/// Absolute paths are local images below the pod's image-root annotation and
/// yield `None` when the annotation is missing. Bare references are pulled
/// from a registry.
pub fn resolve_image(pod: &Pod, container: &Container) -> Option<String> {
    let image = container.image.as_deref().unwrap_or_default();

    if image.starts_with('/') {
        let root = pod.metadata.annotations.as_ref()?.get(IMAGE_ROOT_ANNOTATION)?;
        return Some(format!("{}{}", root.trim_end_matches('/'), image));
    }
    if image.contains("://") {
        return Some(image.to_string());
    }
    Some(format!("docker://{image}"))
}

/// Contents of the env file passed with `--env-file`, one shell-quoted
/// `NAME=VALUE` line per literal environment variable. `None` when the
/// container has no literal variables.
pub fn env_file(container: &Container) -> Option<String> {
    let mut lines = Vec::new();
    for var in container.env.iter().flatten() {
        match &var.value {
            Some(value) => lines.push(format!("{}={}\n", var.name, shell_quote(value))),
            None => debug!(name = %var.name, "skipping env var without literal value"),
        }
    }
    (!lines.is_empty()).then(|| lines.concat())
}

/// Full execution-tool invocation: env-file flag, mount flags, image, command, args.
pub fn exec_command(
    singularity: &Path,
    env: &[String],
    binds: &[String],
    image: &str,
    container: &Container,
) -> Vec<String> {
    let mut argv = vec![singularity.display().to_string(), "exec".to_string()];
    argv.extend(env.iter().cloned());
    argv.extend(binds.iter().cloned());
    argv.push(image.to_string());
    argv.extend(container.command.iter().flatten().cloned());
    argv.extend(container.args.iter().flatten().cloned());
    argv
}

/// Extra `#SBATCH` flags taken from the pod annotation.
pub fn sbatch_flags(pod: &Pod) -> Vec<String> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SLURM_FLAGS_ANNOTATION))
        .map(|flags| flags.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Render the batch script for one container. Output and exit status land
/// next to the script in `pod_dir`.
pub fn render_script(
    pod_dir: &Path,
    job_name: &str,
    container_name: &str,
    flags: &[String],
    command: &[String],
) -> String {
    let file = |ext: &str| pod_dir.join(format!("{container_name}.{ext}")).display().to_string();

    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={job_name}"),
        format!("#SBATCH --output={}", file("out")),
        format!("#SBATCH --error={}", file("err")),
    ];
    lines.extend(flags.iter().map(|flag| format!("#SBATCH {flag}")));
    lines.push(String::new());
    lines.push(command.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" "));
    lines.push(format!("echo $? > {}", shell_quote(&file("status"))));
    lines.push(String::new());
    lines.join("\n")
}

/// Job ID from `sbatch` output, either "Submitted batch job 42" or the
/// `--parsable` form "42;cluster".
pub fn parse_job_id(stdout: &str) -> Option<String> {
    let token = stdout.split_whitespace().last()?;
    let id = token.split(';').next()?;
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::EnvVar;
    use k8s_openapi::api::core::v1::EnvVarSource;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn container(image: &str) -> Container {
        Container {
            name: "c1".to_string(),
            image: Some(image.to_string()),
            command: Some(vec!["python".to_string()]),
            args: Some(vec!["-c".to_string(), "print('hi')".to_string()]),
            ..Default::default()
        }
    }

    fn pod_with_annotations(annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("python"), "python");
        assert_eq!(shell_quote("print('hi')"), r"'print('\''hi'\'')'");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn registry_images_get_docker_scheme() {
        let pod = Pod::default();
        assert_eq!(
            resolve_image(&pod, &container("busybox:1.36")).as_deref(),
            Some("docker://busybox:1.36")
        );
        assert_eq!(
            resolve_image(&pod, &container("oras://ghcr.io/x/y:1")).as_deref(),
            Some("oras://ghcr.io/x/y:1")
        );
    }

    #[test]
    fn absolute_images_need_image_root() {
        let image = container("/images/tool.sif");
        assert_eq!(resolve_image(&Pod::default(), &image), None);

        let pod = pod_with_annotations(&[(IMAGE_ROOT_ANNOTATION, "/shared/")]);
        assert_eq!(
            resolve_image(&pod, &image).as_deref(),
            Some("/shared/images/tool.sif")
        );
    }

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    #[test]
    fn env_file_skips_references() {
        let mut c = container("busybox");
        c.env = Some(vec![
            env("MODE", "fast"),
            EnvVar {
                name: "FROM_REF".to_string(),
                value: None,
                value_from: Some(EnvVarSource::default()),
            },
        ]);

        assert_eq!(env_file(&c).as_deref(), Some("MODE=fast\n"));
        assert_eq!(env_file(&container("busybox")), None);
    }

    #[test]
    fn env_file_keeps_commas_and_spaces_in_values() {
        let mut c = container("busybox");
        c.env = Some(vec![
            env("HOSTS", "a.example,b.example"),
            env("GREETING", "hello, it's me"),
        ]);

        assert_eq!(
            env_file(&c).as_deref(),
            Some("HOSTS=a.example,b.example\nGREETING='hello, it'\\''s me'\n")
        );
    }

    #[test]
    fn exec_command_keeps_fixed_order() {
        let c = container("busybox");
        let argv = exec_command(
            Path::new("singularity"),
            &["--env-file".to_string(), "/d/c1.env".to_string()],
            &["--bind".to_string(), "/h:/c".to_string()],
            "docker://busybox",
            &c,
        );

        assert_eq!(
            argv,
            vec![
                "singularity",
                "exec",
                "--env-file",
                "/d/c1.env",
                "--bind",
                "/h:/c",
                "docker://busybox",
                "python",
                "-c",
                "print('hi')",
            ]
        );
    }

    #[test]
    fn script_carries_flags_and_status_capture() {
        let script = render_script(
            Path::new("/data/default-u1"),
            "u1",
            "c1",
            &["--partition=gpu".to_string()],
            &["singularity".to_string(), "exec".to_string(), "docker://busybox".to_string()],
        );

        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=u1\n"));
        assert!(script.contains("#SBATCH --output=/data/default-u1/c1.out\n"));
        assert!(script.contains("#SBATCH --partition=gpu\n"));
        assert!(script.contains("\nsingularity exec docker://busybox\n"));
        assert!(script.ends_with("echo $? > /data/default-u1/c1.status\n"));
    }

    #[test]
    fn sbatch_flags_split_on_whitespace() {
        let pod = pod_with_annotations(&[(SLURM_FLAGS_ANNOTATION, "--mem=4G  --time=01:00:00")]);
        assert_eq!(sbatch_flags(&pod), vec!["--mem=4G", "--time=01:00:00"]);
        assert!(sbatch_flags(&Pod::default()).is_empty());
    }

    #[test]
    fn parses_job_id_forms() {
        assert_eq!(parse_job_id("Submitted batch job 42\n").as_deref(), Some("42"));
        assert_eq!(parse_job_id("42;cluster\n").as_deref(), Some("42"));
        assert_eq!(parse_job_id("sbatch: error").as_deref(), None);
        assert_eq!(parse_job_id("").as_deref(), None);
    }
}
