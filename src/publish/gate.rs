//! Pre-publish checklist and the hand-off to the model catalog.
//!
//! Checks run in a fixed order and every structural check happens before the
//! first remote call:
//!
//! 1. training code and artifact directory are committed
//! 2. metadata is valid and fits the catalog budget
//! 3. schemas are valid; oversized ones go to side files
//! 4. project and compartment ids resolve
//! 5. `runtime.yaml` is merged, checked for deployability and written
//! 6. introspection passes, unless it is ignored
//! 7. upload

use std::path::Path;

use tracing::{error, info, warn};

use crate::artifact::files::{files_summary, list_files, purge_cache};
use crate::common::config::{ArtifactOptions, SaveOptions, SessionCfg};
use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::progress::Progress;
use crate::metadata::{
    Category, CustomKey, CustomMetadata, TaxonomyKey, TaxonomyMetadata, METADATA_SIZE_LIMIT,
};
use crate::provenance::{ProvenanceRecord, ProvenanceResolver};
use crate::runtime::{check_deployment, merge_training_code, FsRuntimeStore, RuntimeStore};
use crate::schema::{Schema, INPUT_SCHEMA_FILE_NAME, OUTPUT_SCHEMA_FILE_NAME};

use super::domain::{
    IntrospectionReport, IntrospectionStatus, Introspector, ModelCatalog, SaveOutcome,
    UploadRequest,
};

/// The parts of a bundle the gate reads and updates.
pub struct BundleParts<'a> {
    pub dir: &'a Path,
    pub options: &'a ArtifactOptions,
    pub custom_metadata: &'a mut CustomMetadata,
    pub taxonomy_metadata: &'a mut TaxonomyMetadata,
    pub input_schema: &'a Schema,
    pub output_schema: &'a Schema,
}

/// Runs the checklist and publishes through the catalog collaborator.
pub struct PublishGate<'a> {
    cfg: &'a SessionCfg,
    resolver: &'a ProvenanceResolver<'a>,
    catalog: &'a dyn ModelCatalog,
    introspector: Option<&'a dyn Introspector>,
}

impl<'a> PublishGate<'a> {
    pub fn new(
        cfg: &'a SessionCfg,
        resolver: &'a ProvenanceResolver<'a>,
        catalog: &'a dyn ModelCatalog,
    ) -> Self {
        Self {
            cfg,
            resolver,
            catalog,
            introspector: None,
        }
    }

    pub fn with_introspector(mut self, introspector: &'a dyn Introspector) -> Self {
        self.introspector = Some(introspector);
        self
    }

    pub fn introspector(&self) -> Option<&'a dyn Introspector> {
        self.introspector
    }

    /// Check the bundle and upload it. A catalog timeout is logged and
    /// returned as [`SaveOutcome::TimedOut`]; every other failure is an error.
    pub fn save(
        &self,
        bundle: BundleParts<'_>,
        opts: &SaveOptions,
        progress: &mut dyn Progress,
    ) -> ArtifactResult<SaveOutcome> {
        let BundleParts {
            dir,
            options,
            custom_metadata,
            taxonomy_metadata,
            input_schema,
            output_schema,
        } = bundle;

        progress.update("Checking for uncommitted changes");
        let code = self.resolver.training_code_info(
            dir,
            opts.training_script_path.as_deref(),
            opts.ignore_pending_changes,
        )?;

        progress.update("Validating metadata");
        purge_cache(dir)?;
        let files = list_files(dir)?;
        custom_metadata.add(
            CustomKey::ModelArtifacts,
            Some(files_summary(&files)),
            "The list of files located in the artifact directory.",
            Category::Other,
            true,
        )?;
        validate_metadata(custom_metadata, taxonomy_metadata)?;

        progress.update("Validating schema");
        validate_schemas(dir, input_schema, output_schema)?;

        let (project_id, compartment_id) = self.resolve_identifiers(opts)?;

        progress.update("Updating runtime.yaml");
        let store = FsRuntimeStore::new(dir);
        let descriptor = merge_training_code(store.read_current()?, code.clone());
        check_deployment(&descriptor, options)?;
        store.save(&descriptor)?;

        if opts.ignore_introspection {
            info!("introspection skipped");
        } else {
            progress.update("Running introspection");
            let report = introspect(self.introspector, dir, taxonomy_metadata)?;
            if report.status() == IntrospectionStatus::NotPassed {
                return Err(ArtifactError::IntrospectionNotPassed {
                    failed: report.failed_count(),
                });
            }
        }

        let training_id = opts
            .training_id
            .clone()
            .or_else(|| self.cfg.training_resource_id().map(str::to_string));
        let provenance = ProvenanceRecord::new(&code, training_id);
        let request = UploadRequest {
            artifact_dir: dir,
            files: &files,
            display_name: opts.display_name.as_deref(),
            description: opts.description.as_deref(),
            project_id: &project_id,
            compartment_id: &compartment_id,
            provenance: &provenance,
            custom_metadata: &*custom_metadata,
            taxonomy_metadata: &*taxonomy_metadata,
            input_schema,
            output_schema,
            freeform_tags: &opts.freeform_tags,
            defined_tags: &opts.defined_tags,
            timeout: opts.timeout,
        };

        progress.update("Uploading model artifact");
        match self.catalog.upload(&request, progress) {
            Ok(model_id) => {
                info!(model_id = %model_id, project_id = %project_id, "model saved to the catalog");
                Ok(SaveOutcome::Published(model_id))
            }
            Err(err) if err.is_timeout() => {
                let message = format!(
                    "the model catalog did not answer in time ({err}); increase `timeout` and save again"
                );
                error!(timeout = ?opts.timeout, "{message}");
                Ok(SaveOutcome::TimedOut(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Project and compartment ids from the save options, else the session defaults.
    pub fn resolve_identifiers(&self, opts: &SaveOptions) -> ArtifactResult<(String, String)> {
        let project = opts
            .project_id
            .as_deref()
            .or_else(|| self.cfg.default_project())
            .ok_or(ArtifactError::MissingIdentifier("project_id"))?;
        let compartment = opts
            .compartment_id
            .as_deref()
            .or_else(|| self.cfg.default_compartment())
            .ok_or(ArtifactError::MissingIdentifier("compartment_id"))?;
        Ok((project.to_string(), compartment.to_string()))
    }
}

/// Entry constraints of both documents plus their combined size budget.
pub fn validate_metadata(
    custom: &CustomMetadata,
    taxonomy: &TaxonomyMetadata,
) -> ArtifactResult<()> {
    custom.validate()?;
    taxonomy.validate()?;
    let size = custom.size() + taxonomy.size();
    if size > METADATA_SIZE_LIMIT {
        return Err(ArtifactError::MetadataTooLarge {
            size,
            limit: METADATA_SIZE_LIMIT,
        });
    }
    Ok(())
}

/// Oversized schemas are written next to the artifact instead of failing.
pub fn validate_schemas(dir: &Path, input: &Schema, output: &Schema) -> ArtifactResult<()> {
    for (schema, file) in [
        (input, INPUT_SCHEMA_FILE_NAME),
        (output, OUTPUT_SCHEMA_FILE_NAME),
    ] {
        if let Err(ArtifactError::SchemaTooLarge { size, limit }) = schema.validate_size() {
            let path = dir.join(file);
            schema.to_json_file(&path)?;
            warn!(
                size,
                limit,
                path = %path.display(),
                "schema is too large for catalog metadata; it is kept in a side file"
            );
        }
        schema.validate_schema()?;
    }
    Ok(())
}

/// Run the rule set and record the results under `ArtifactTestResults`.
/// Without an introspector nothing is tested.
pub fn introspect(
    introspector: Option<&dyn Introspector>,
    dir: &Path,
    taxonomy: &mut TaxonomyMetadata,
) -> ArtifactResult<IntrospectionReport> {
    let Some(introspector) = introspector else {
        warn!("no introspection rules are configured; the artifact was not tested");
        return Ok(IntrospectionReport::default());
    };
    let report = IntrospectionReport {
        results: introspector.run(dir)?,
    };
    for failure in report.failures() {
        error!(rule = %failure.name, "{}", failure.message);
    }
    taxonomy.set(TaxonomyKey::ArtifactTestResults, Some(report.to_value()));
    info!(
        status = %report.status(),
        rules = report.results.len(),
        failed = report.failed_count(),
        "introspection finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::progress::{NoProgress, StepCounter};
    use crate::provenance::{RepoState, VcsProbe};
    use crate::publish::domain::RuleResult;
    use crate::runtime::{empty_template, RUNTIME_FILE_NAME};
    use std::cell::Cell;
    use std::fs;

    struct NoRepo;

    impl VcsProbe for NoRepo {
        fn inspect(&self, start: &Path) -> ArtifactResult<RepoState> {
            Err(ArtifactError::NoRepository(start.to_path_buf()))
        }
    }

    #[derive(Default)]
    struct Catalog {
        calls: Cell<usize>,
        time_out: bool,
    }

    impl ModelCatalog for Catalog {
        fn upload(
            &self,
            request: &UploadRequest<'_>,
            progress: &mut dyn Progress,
        ) -> ArtifactResult<String> {
            self.calls.set(self.calls.get() + 1);
            progress.update("uploading");
            if self.time_out {
                return Err(ArtifactError::timeout("model catalog", "read timed out"));
            }
            Ok(format!("ocid1.model.{}", request.files.len()))
        }
    }

    struct Rules(Vec<RuleResult>);

    impl Introspector for Rules {
        fn run(&self, _dir: &Path) -> ArtifactResult<Vec<RuleResult>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        options: ArtifactOptions,
        custom: CustomMetadata,
        taxonomy: TaxonomyMetadata,
        schema: Schema,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("score.py"), "def predict(data, model): pass\n").unwrap();
            let options = ArtifactOptions {
                inference_conda_env: Some("oci://b@ns/envs/myenv_v1".into()),
                inference_python_version: Some("3.8".into()),
                ..Default::default()
            };
            FsRuntimeStore::new(dir.path()).save(&empty_template(&options)).unwrap();
            Self {
                dir,
                options,
                custom: CustomMetadata::new(),
                taxonomy: TaxonomyMetadata::new(),
                schema: Schema::default(),
            }
        }

        fn parts(&mut self) -> BundleParts<'_> {
            BundleParts {
                dir: self.dir.path(),
                options: &self.options,
                custom_metadata: &mut self.custom,
                taxonomy_metadata: &mut self.taxonomy,
                input_schema: &self.schema,
                output_schema: &self.schema,
            }
        }
    }

    fn ids() -> SaveOptions {
        SaveOptions {
            project_id: Some("ocid1.project".into()),
            compartment_id: Some("ocid1.compartment".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_project_fails_before_the_catalog_is_called() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let mut fixture = Fixture::new();
        let err = gate
            .save(fixture.parts(), &SaveOptions::default(), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingIdentifier("project_id")));
        assert_eq!(catalog.calls.get(), 0);
    }

    #[test]
    fn session_defaults_fill_missing_identifiers() {
        let cfg = SessionCfg {
            project_ocid: Some("ocid1.project".into()),
            compartment_ocid: Some("ocid1.compartment".into()),
            ..Default::default()
        };
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let (project, compartment) = gate.resolve_identifiers(&SaveOptions::default()).unwrap();
        assert_eq!(project, "ocid1.project");
        assert_eq!(compartment, "ocid1.compartment");
    }

    #[test]
    fn successful_save_writes_runtime_and_uploads() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let mut fixture = Fixture::new();
        let mut progress = StepCounter::default();

        let outcome = gate.save(fixture.parts(), &ids(), &mut progress).unwrap();
        assert_eq!(outcome, SaveOutcome::Published("ocid1.model.2".into()));
        assert_eq!(catalog.calls.get(), 1);
        assert_eq!(progress.last.as_deref(), Some("uploading"));
        assert_eq!(
            fixture.custom.value(CustomKey::ModelArtifacts),
            Some("runtime.yaml, score.py")
        );
        let raw = fs::read_to_string(fixture.dir.path().join(RUNTIME_FILE_NAME)).unwrap();
        assert!(raw.contains("TRAINING_CODE"));
        assert!(raw.contains("ARTIFACT_DIRECTORY"));
        assert!(raw.contains("oci://b@ns/envs/myenv_v1"));
    }

    #[test]
    fn oversized_metadata_is_rejected() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let mut fixture = Fixture::new();
        fixture
            .custom
            .add(
                CustomKey::TrainingDataset,
                Some("x".repeat(35_000)),
                "",
                Category::TrainingAndValidationDatasets,
                false,
            )
            .unwrap();
        match gate.save(fixture.parts(), &ids(), &mut NoProgress) {
            Err(ArtifactError::MetadataTooLarge { size, limit }) => {
                assert!(size > 35_000);
                assert_eq!(limit, METADATA_SIZE_LIMIT);
            }
            other => panic!("expected MetadataTooLarge, got {other:?}"),
        }
        assert_eq!(catalog.calls.get(), 0);
    }

    #[test]
    fn failed_introspection_blocks_the_upload() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let rules = Rules(vec![
            RuleResult::passed("score_py_present"),
            RuleResult::failed("model_file_present", "model.onnx is missing"),
        ]);
        let gate = PublishGate::new(&cfg, &resolver, &catalog).with_introspector(&rules);
        let mut fixture = Fixture::new();
        let opts = SaveOptions {
            ignore_introspection: false,
            ..ids()
        };
        let err = gate.save(fixture.parts(), &opts, &mut NoProgress).unwrap_err();
        assert!(matches!(err, ArtifactError::IntrospectionNotPassed { failed: 1 }));
        assert_eq!(catalog.calls.get(), 0);
        assert!(fixture
            .taxonomy
            .value(TaxonomyKey::ArtifactTestResults)
            .is_some());
    }

    #[test]
    fn timeouts_become_a_retry_message() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog {
            time_out: true,
            ..Default::default()
        };
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let mut fixture = Fixture::new();
        match gate.save(fixture.parts(), &ids(), &mut NoProgress).unwrap() {
            SaveOutcome::TimedOut(message) => assert!(message.contains("increase `timeout`")),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn undeployable_runtime_fails_unless_ignored() {
        let cfg = SessionCfg::default();
        let resolver = ProvenanceResolver::new(&cfg, &NoRepo);
        let catalog = Catalog::default();
        let gate = PublishGate::new(&cfg, &resolver, &catalog);
        let mut fixture = Fixture::new();
        fixture.options = ArtifactOptions::default();
        FsRuntimeStore::new(fixture.dir.path())
            .save(&empty_template(&fixture.options))
            .unwrap();
        let err = gate.save(fixture.parts(), &ids(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, ArtifactError::DeploymentIncomplete));

        fixture.options.ignore_deployment_error = true;
        assert!(gate.save(fixture.parts(), &ids(), &mut NoProgress).is_ok());
    }
}
