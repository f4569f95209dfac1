use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub(crate) const ROOT_ENV_VAR: &str = "BUNKER_ROOT";

#[derive(Debug, Error)]
pub(crate) enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error(
        "BUNKER_ROOT is set but does not point to a valid project root: {path}\n\
A valid root must contain Cargo.toml and either crates/ or assets/."
    )]
    InvalidEnvRoot { path: PathBuf },
    #[error(
        "Could not detect project root by walking upward from executable directory: {start_dir}\n\
Expected a directory containing Cargo.toml and either crates/ or assets/.\n\
Set {env_var} explicitly, for example:\n\
Bash/zsh: export {env_var}=\"/path/to/bunker\""
    )]
    RootNotFound {
        start_dir: PathBuf,
        env_var: &'static str,
    },
}

pub(crate) fn resolve_root() -> Result<PathBuf, StartupError> {
    resolve_root_from(env::var(ROOT_ENV_VAR), env::current_exe)
}

fn resolve_root_from(
    env_value: Result<String, env::VarError>,
    current_exe: impl FnOnce() -> io::Result<PathBuf>,
) -> Result<PathBuf, StartupError> {
    match env_value {
        Ok(value) => {
            let normalized = normalize_path(Path::new(&value));
            if is_repo_marker(&normalized) {
                Ok(normalized)
            } else {
                Err(StartupError::InvalidEnvRoot { path: normalized })
            }
        }
        Err(env::VarError::NotPresent) => {
            let exe = current_exe().map_err(StartupError::CurrentExe)?;
            let exe_dir = exe
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?;

            exe_dir
                .ancestors()
                .find(|candidate| is_repo_marker(candidate))
                .map(normalize_path)
                .ok_or_else(|| StartupError::RootNotFound {
                    start_dir: normalize_path(&exe_dir),
                    env_var: ROOT_ENV_VAR,
                })
        }
        Err(source) => Err(StartupError::EnvVar {
            var: ROOT_ENV_VAR,
            source,
        }),
    }
}

/// Relative asset paths are taken from the project root.
pub(crate) fn resolve_asset_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn is_repo_marker(path: &Path) -> bool {
    let cargo_toml = path.join("Cargo.toml").is_file();
    let has_crates = path.join("crates").is_dir();
    let has_assets = path.join("assets").is_dir();

    cargo_toml && (has_crates || has_assets)
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("Cargo.toml"), "[workspace]\n").expect("cargo toml");
        fs::create_dir_all(dir.path().join("assets").join("rooms")).expect("assets");
        dir
    }

    #[test]
    fn repo_marker_requires_cargo_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("assets")).expect("assets");

        assert!(!is_repo_marker(dir.path()));
        assert!(is_repo_marker(project_dir().path()));
    }

    #[test]
    fn env_root_must_be_a_project() {
        let dir = tempfile::tempdir().expect("temp dir");
        let value = dir.path().display().to_string();

        let error = resolve_root_from(Ok(value), || unreachable!("exe not consulted"))
            .unwrap_err();

        assert!(matches!(error, StartupError::InvalidEnvRoot { .. }));
    }

    #[test]
    fn env_root_is_used_when_valid() {
        let project = project_dir();

        let root = resolve_root_from(Ok(project.path().display().to_string()), || {
            unreachable!("exe not consulted")
        })
        .expect("root");

        assert_eq!(root, normalize_path(project.path()));
    }

    #[test]
    fn root_is_found_by_walking_up_from_exe() {
        let project = project_dir();
        let exe = project.path().join("target").join("debug").join("bunker");
        fs::create_dir_all(exe.parent().expect("parent")).expect("target dir");

        let root = resolve_root_from(Err(env::VarError::NotPresent), || Ok(exe.clone()))
            .expect("root");

        assert_eq!(root, normalize_path(project.path()));
    }

    #[test]
    fn relative_assets_resolve_against_root() {
        let root = Path::new("/srv/bunker");

        assert_eq!(
            resolve_asset_path(root, Path::new("assets/rooms/bunker.json")),
            root.join("assets/rooms/bunker.json")
        );
        let absolute = root.join("elsewhere.json");
        assert_eq!(resolve_asset_path(root, &absolute), absolute);
    }
}
