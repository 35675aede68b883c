//! Builtin recipe scripts
//!
//! Canonical script bodies the pipeline engine references by name. Build
//! steps resolve to one of these, either explicitly or by probing the
//! workspace for project markers.

use std::path::Path;

use flowforge_core::spec::BuildKind;

pub const NODE_BUILD: &str = r#"#!/bin/bash
# Node.js project build
set -e

echo "Building Node.js project..."

if [ -f "package.json" ]; then
    echo "Installing npm dependencies..."
    npm install
fi

if [ -f "package.json" ] && npm run | grep -q "build"; then
    echo "Running build command..."
    npm run build
fi

echo "Node.js build finished"
"#;

pub const GO_BUILD: &str = r#"#!/bin/bash
# Go project build
set -e

echo "Building Go project..."

echo "Downloading module dependencies..."
go mod download

echo "Running tests..."
go test ./...

echo "Compiling..."
go build -o app .

echo "Go build finished"
"#;

pub const DOCKER_BUILD: &str = r#"#!/bin/bash
# Docker image build
set -e

echo "Starting Docker build..."

if [ -f "Dockerfile" ]; then
    echo "Building image..."
    docker build -t $PROJECT_NAME:$BUILD_VERSION .

    echo "Image built: $PROJECT_NAME:$BUILD_VERSION"
else
    echo "No Dockerfile found"
    exit 1
fi
"#;

pub const DEPLOY_SCRIPT: &str = r#"#!/bin/bash
# Deployment
set -e

echo "Deploying application..."

echo "Stopping old service..."
sudo systemctl stop $SERVICE_NAME || true

if [ -f "$DEPLOY_PATH/$APP_NAME" ]; then
    echo "Backing up previous version..."
    sudo cp "$DEPLOY_PATH/$APP_NAME" "$DEPLOY_PATH/$APP_NAME.backup.$(date +%Y%m%d_%H%M%S)"
fi

echo "Installing new version..."
sudo cp ./app "$DEPLOY_PATH/$APP_NAME"
sudo chmod +x "$DEPLOY_PATH/$APP_NAME"

echo "Starting service..."
sudo systemctl start $SERVICE_NAME
sudo systemctl enable $SERVICE_NAME

echo "Deployment finished"
"#;

/// Looks up a builtin recipe body by name.
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "node_build" => Some(NODE_BUILD),
        "go_build" => Some(GO_BUILD),
        "docker_build" => Some(DOCKER_BUILD),
        "deploy_script" => Some(DEPLOY_SCRIPT),
        _ => None,
    }
}

/// Names of all registered recipes.
pub fn builtin_names() -> [&'static str; 4] {
    ["node_build", "go_build", "docker_build", "deploy_script"]
}

/// Resolves a build step to a recipe `(name, body)`.
///
/// `Auto` (or an absent kind) probes the workspace for markers in priority
/// order: `package.json`, then `go.mod`, then `Dockerfile`.
pub fn resolve_build_recipe(
    kind: Option<BuildKind>,
    workspace: &Path,
) -> Result<(&'static str, &'static str), String> {
    let name = match kind.unwrap_or(BuildKind::Auto) {
        BuildKind::Node => "node_build",
        BuildKind::Go => "go_build",
        BuildKind::Docker => "docker_build",
        BuildKind::Auto => {
            if workspace.join("package.json").exists() {
                "node_build"
            } else if workspace.join("go.mod").exists() {
                "go_build"
            } else if workspace.join("Dockerfile").exists() {
                "docker_build"
            } else {
                return Err("cannot auto-detect build type".to_string());
            }
        }
    };

    Ok((name, builtin(name).expect("registered recipe")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_complete() {
        for name in builtin_names() {
            assert!(builtin(name).is_some(), "missing builtin recipe: {}", name);
        }
        assert!(builtin("rustc_build").is_none());
    }

    #[test]
    fn test_explicit_kinds() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_build_recipe(Some(BuildKind::Node), dir.path()).unwrap().0, "node_build");
        assert_eq!(resolve_build_recipe(Some(BuildKind::Go), dir.path()).unwrap().0, "go_build");
        assert_eq!(
            resolve_build_recipe(Some(BuildKind::Docker), dir.path()).unwrap().0,
            "docker_build"
        );
    }

    #[test]
    fn test_auto_detect_priority_order() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        assert_eq!(
            resolve_build_recipe(Some(BuildKind::Auto), dir.path()).unwrap().0,
            "docker_build"
        );

        std::fs::write(dir.path().join("go.mod"), "module example.com/app").unwrap();
        assert_eq!(resolve_build_recipe(Some(BuildKind::Auto), dir.path()).unwrap().0, "go_build");

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(resolve_build_recipe(None, dir.path()).unwrap().0, "node_build");
    }

    #[test]
    fn test_auto_detect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_build_recipe(Some(BuildKind::Auto), dir.path()).unwrap_err();
        assert!(err.contains("cannot auto-detect"));
    }
}
