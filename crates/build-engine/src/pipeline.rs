//! Standard Android pipeline
//!
//! Wires every step for a project into one orchestrator:
//! resolve, AARs, manifest, aapt2 compile/link, kotlinc, javac, d8, APK
//! assembly and, when a keystore is configured, signing.

use apkforge_core::{BuildOrchestrator, BuildStep, PipelineConfig, SharedArtifacts};
use apkforge_dependency_resolver::DependencyResolver;
use apkforge_manifest_manager::{ManifestOptions, ManifestProcessor};
use tracing::{debug, info};

use crate::aapt2::{Aapt2Compile, Aapt2Link};
use crate::aar::ProcessAars;
use crate::apk::ApkBuild;
use crate::compile::{JavaCompile, KotlinCompile};
use crate::config::ProjectLayout;
use crate::dex::D8Compile;
use crate::signing::ApkSign;
use crate::BuildError;

/// Build the standard step list for `layout`
pub fn standard(config: &PipelineConfig, layout: &ProjectLayout) -> Result<BuildOrchestrator, BuildError> {
    standard_with_artifacts(config, layout, SharedArtifacts::new())
}

/// Same as [`standard`], sharing `artifacts` with the caller
pub fn standard_with_artifacts(
    config: &PipelineConfig,
    layout: &ProjectLayout,
    artifacts: SharedArtifacts,
) -> Result<BuildOrchestrator, BuildError> {
    let tools = &config.toolchain;
    info!("Assembling pipeline for {:?}", layout.project_dir);

    let manifest_options = ManifestOptions {
        package_name: config.package_name.clone(),
        min_sdk: config.sdk.min_sdk,
        target_sdk: config.sdk.target_sdk,
        required_permissions: config.manifest.required_permissions.clone(),
    };

    let mut steps: Vec<Box<dyn BuildStep>> = vec![
        Box::new(DependencyResolver::new(
            layout.dependency_file(),
            &config.resolver,
            artifacts.clone(),
        )?),
        Box::new(ProcessAars::new(
            artifacts.clone(),
            layout.exploded_aars_dir(),
            layout.compiled_aars_dir(),
            &tools.aapt2,
            &tools.java,
        )),
        Box::new(
            ManifestProcessor::new(layout.manifest(), manifest_options).with_output(layout.processed_manifest()),
        ),
        Box::new(Aapt2Compile::new(
            &tools.aapt2,
            &tools.java,
            layout.res_dir(),
            layout.compiled_res_dir(),
        )),
        Box::new(Aapt2Link::new(
            &tools.aapt2,
            &tools.java,
            &tools.android_jar,
            layout.processed_manifest(),
            layout.compiled_res_dir(),
            artifacts.compiled_resources.clone(),
            layout.linked_apk(),
            layout.gen_dir(),
        )),
    ];

    if let Some(kotlinc) = &tools.kotlinc {
        steps.push(Box::new(KotlinCompile::new(
            kotlinc,
            &tools.java,
            &tools.android_jar,
            vec![layout.kotlin_dir(), layout.java_dir()],
            layout.classes_dir(),
            artifacts.classpath.clone(),
        )));
    } else {
        debug!("No kotlinc configured, Kotlin sources will not be compiled");
    }

    steps.push(Box::new(JavaCompile::new(
        &tools.javac,
        &tools.java,
        &tools.android_jar,
        vec![layout.java_dir(), layout.kotlin_dir(), layout.gen_dir()],
        layout.classes_dir(),
        artifacts.classpath.clone(),
    )));
    steps.push(Box::new(D8Compile::new(
        &tools.d8,
        &tools.java,
        &tools.android_jar,
        layout.classes_dir(),
        layout.dex_dir(),
        artifacts.classpath.clone(),
        config.sdk.min_sdk,
    )));
    steps.push(Box::new(
        ApkBuild::new(layout.linked_apk(), layout.dex_dir(), layout.output_apk())
            .with_native_libs(layout.jni_libs_dir())
            .with_assets(layout.assets_dir()),
    ));

    if let Some(signing) = &config.signing {
        let mut sign = ApkSign::new(&tools.apksigner, &tools.java, signing.clone(), layout.output_apk());
        if let Some(zipalign) = &tools.zipalign {
            sign = sign.with_zipalign(zipalign);
        }
        steps.push(Box::new(sign));
    } else {
        info!("No signing configuration, the APK will be left unsigned");
    }

    Ok(BuildOrchestrator::new(steps).with_final_artifact(layout.output_apk()))
}
