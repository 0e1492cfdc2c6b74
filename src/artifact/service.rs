//! The model artifact bundle: a directory plus the metadata, schemas and
//! runtime descriptor that describe it.

use std::fmt;
use std::fs as std_fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::common::config::{ArtifactOptions, ConflictStrategy, SaveOptions, SessionCfg};
use crate::common::error::{ArtifactError, ArtifactResult};
use crate::common::fs;
use crate::common::progress::Progress;
use crate::common::storage::{ObjectStorage, StorageUri};
use crate::metadata::{
    Category, CustomItem, CustomKey, CustomMetadata, ModelInfoExtractor, TaxonomyMetadata,
    UseCaseType,
};
use crate::provenance::{ProvenanceResolver, VcsProbe};
use crate::publish::{
    self, BundleParts, IntrospectionReport, Introspector, PublishGate, SaveOutcome,
};
use crate::runtime::{
    is_legacy_version, FormatGeneration, FsRuntimeStore, LoadedRuntime, RuntimeBuilder,
    RuntimeStore, MODEL_ARTIFACT_VERSION,
};
use crate::schema::{
    self, Schema, TabularSample, INPUT_SCHEMA_FILE_NAME, OUTPUT_SCHEMA_FILE_NAME,
};

use super::files::{self, files_summary, purge_cache};
use super::requirements::{self, InstallReport, PackageIndex};
use super::score::{self, load_score_module, ModelHandle, ScoreLoader, ScoreModule};
use super::snapshot::{self, DataKind, SnapshotSource};

/// Value of the `ClientLibrary` metadata entry.
pub const CLIENT_LIBRARY: &str = env!("CARGO_PKG_NAME");

/// Collaborators used while a bundle is opened.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub vcs: &'a dyn VcsProbe,
    pub storage: Option<&'a dyn ObjectStorage>,
    pub score_loader: Option<&'a dyn ScoreLoader>,
    pub packages: Option<&'a dyn PackageIndex>,
}

impl<'a> Collaborators<'a> {
    pub fn new(vcs: &'a dyn VcsProbe) -> Self {
        Self {
            vcs,
            storage: None,
            score_loader: None,
            packages: None,
        }
    }

    pub fn with_storage(mut self, storage: &'a dyn ObjectStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_score_loader(mut self, loader: &'a dyn ScoreLoader) -> Self {
        self.score_loader = Some(loader);
        self
    }

    pub fn with_packages(mut self, packages: &'a dyn PackageIndex) -> Self {
        self.packages = Some(packages);
        self
    }
}

/// A model artifact directory and everything known about it.
///
/// The directory is owned by one bundle at a time; nothing is locked.
pub struct ModelArtifact {
    dir: PathBuf,
    cfg: SessionCfg,
    options: ArtifactOptions,
    pub custom_metadata: CustomMetadata,
    pub taxonomy_metadata: TaxonomyMetadata,
    pub schema_input: Schema,
    pub schema_output: Schema,
    version: String,
    generation: FormatGeneration,
    vm_id: Option<String>,
    conda_env: Option<String>,
    serialization_format: Option<String>,
    score: Option<Box<dyn ScoreModule>>,
    model: Option<Box<dyn ModelHandle>>,
}

impl ModelArtifact {
    /// Open the bundle at `dir`. Depending on `options` this writes a fresh
    /// `runtime.yaml`, installs the declared libraries and reloads the model.
    pub fn open(
        dir: impl AsRef<Path>,
        cfg: SessionCfg,
        options: ArtifactOptions,
        collaborators: &Collaborators<'_>,
        progress: &mut dyn Progress,
    ) -> ArtifactResult<Self> {
        let dir = dir.as_ref();
        if options.create {
            std_fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
        }
        let mut artifact = Self::new(fs::absolute(dir)?, cfg, options);

        if artifact.options.create {
            artifact.create_runtime(collaborators, progress)?;
        }
        if artifact.options.install_libs {
            progress.update("Installing libraries");
            // The requirements file name depends on the bundle's format.
            artifact.refresh_runtime()?;
            let packages = collaborators.packages.ok_or_else(|| {
                ArtifactError::InvalidArgument(
                    "`install_libs` needs a package index collaborator".to_string(),
                )
            })?;
            artifact.install_requirements(packages, artifact.options.conflict_strategy)?;
        }
        if artifact.options.reload {
            progress.update("Loading the model");
            artifact.reload(collaborators.score_loader, None)?;
        }
        Ok(artifact)
    }

    /// Bundle over `dir` without touching the filesystem.
    pub fn new(dir: PathBuf, cfg: SessionCfg, options: ArtifactOptions) -> Self {
        Self {
            dir,
            cfg,
            options,
            custom_metadata: CustomMetadata::new(),
            taxonomy_metadata: TaxonomyMetadata::new(),
            schema_input: Schema::default(),
            schema_output: Schema::default(),
            version: MODEL_ARTIFACT_VERSION.to_string(),
            generation: FormatGeneration::Absent,
            vm_id: None,
            conda_env: None,
            serialization_format: None,
            score: None,
            model: None,
        }
    }

    fn create_runtime(
        &self,
        collaborators: &Collaborators<'_>,
        progress: &mut dyn Progress,
    ) -> ArtifactResult<()> {
        let mut resolver = ProvenanceResolver::new(&self.cfg, collaborators.vcs);
        if let Some(storage) = collaborators.storage {
            resolver = resolver.with_storage(storage);
        }
        let descriptor =
            RuntimeBuilder::new(&self.cfg, &resolver).create(&self.dir, &self.options, progress)?;
        let store = FsRuntimeStore::new(&self.dir);
        store.save(&descriptor)?;
        info!(path = %store.path().display(), "runtime.yaml written");
        Ok(())
    }

    /// Read the descriptor on disk into the format state of the bundle.
    fn refresh_runtime(&mut self) -> ArtifactResult<LoadedRuntime> {
        let loaded = FsRuntimeStore::new(&self.dir).load()?;
        self.version = loaded.version.clone();
        self.generation = loaded.generation;
        self.vm_id = loaded.vm_id.clone();
        self.conda_env = loaded.conda_env.clone();
        Ok(loaded)
    }

    /// Re-read the runtime descriptor and, when a loader is given, load the
    /// score module and the model. The serialization format is derived from
    /// `model_file_name` (default: the bundle's model file) and upserted into
    /// the custom metadata.
    pub fn reload(
        &mut self,
        loader: Option<&dyn ScoreLoader>,
        model_file_name: Option<&str>,
    ) -> ArtifactResult<()> {
        let loaded = self.refresh_runtime()?;
        let model_file_name = model_file_name
            .unwrap_or(&self.options.model_file_name)
            .to_string();
        let legacy = loaded.is_legacy();

        match loader {
            Some(loader) => {
                let module = load_score_module(loader, &self.dir, legacy)?;
                // Legacy score modules take no file name.
                let model = if legacy {
                    module.load_model(None)?
                } else {
                    module.load_model(Some(&model_file_name))?
                };
                self.score = Some(module);
                self.model = Some(model);
            }
            None => debug!("no score loader configured; the model is not loaded"),
        }

        purge_cache(&self.dir)?;

        let format = detect_serialization_format(&model_file_name);
        self.custom_metadata.add(
            CustomKey::ModelSerializationFormat,
            format.clone(),
            "The model serialization format.",
            Category::TrainingProfile,
            true,
        )?;
        self.serialization_format = format;
        self.options.model_file_name = model_file_name;
        Ok(())
    }

    /// Fill taxonomy metadata from `extractor` and refresh the custom entries
    /// derived from the runtime descriptor and the directory contents.
    pub fn populate_metadata(
        &mut self,
        extractor: Option<&dyn ModelInfoExtractor>,
        use_case: Option<UseCaseType>,
    ) -> ArtifactResult<()> {
        if use_case.is_some() {
            self.taxonomy_metadata.set_use_case(use_case);
        }
        match extractor {
            Some(extractor) => self.taxonomy_metadata.populate_from(&extractor.extract()),
            None => info!(
                "no model information extractor given; Framework, Algorithm and Hyperparameters \
                 stay empty. Pass an extractor for the model to populate them"
            ),
        }
        self.taxonomy_metadata.spill_hyperparameters(&self.dir)?;
        self.populate_custom_metadata()
    }

    fn populate_custom_metadata(&mut self) -> ArtifactResult<()> {
        let descriptor = FsRuntimeStore::new(&self.dir).read_current()?;
        let inference = descriptor.as_ref().and_then(|d| d.inference_env());
        let conda_env = descriptor
            .as_ref()
            .and_then(|d| d.training_env_slug())
            .map(str::to_string)
            .or_else(|| self.conda_env.clone());
        let summary = files_summary(&self.list_files()?);

        let env = Category::TrainingEnvironment;
        let items = vec![
            CustomItem::new(
                CustomKey::CondaEnvironment,
                conda_env,
                "The conda environment where the model was trained.",
                env,
            ),
            CustomItem::new(
                CustomKey::EnvironmentType,
                inference
                    .and_then(|e| e.inference_env_type)
                    .map(|t| t.to_string()),
                "The environment type, must be a 'published' or 'data_science'.",
                env,
            ),
            CustomItem::new(
                CustomKey::SlugName,
                inference.and_then(|e| e.inference_env_slug.clone()),
                "The slug name of the conda environment.",
                env,
            ),
            CustomItem::new(
                CustomKey::CondaEnvironmentPath,
                inference.and_then(|e| e.inference_env_path.clone()),
                "The oci path of the conda environment.",
                env,
            ),
            CustomItem::new(
                CustomKey::ModelArtifacts,
                Some(summary),
                "The list of files located in the artifact directory.",
                Category::Other,
            ),
            CustomItem::new(
                CustomKey::ModelSerializationFormat,
                self.serialization_format.clone(),
                "The model serialization format.",
                Category::TrainingProfile,
            ),
            CustomItem::new(
                CustomKey::ClientLibrary,
                Some(CLIENT_LIBRARY.to_string()),
                "",
                Category::Other,
            ),
        ];
        self.custom_metadata.add_many(items, true)
    }

    /// Infer the input and output schemas from samples. Inferred schemas are
    /// written to their side files; one too large for the catalog is not kept
    /// in memory. Samples wider than `max_columns` leave the schema empty.
    pub fn populate_schema(
        &mut self,
        input: Option<&TabularSample>,
        output: Option<&TabularSample>,
        max_columns: usize,
    ) -> ArtifactResult<()> {
        self.schema_input = prepare_schema(&self.dir, input, INPUT_SCHEMA_FILE_NAME, max_columns)?;
        self.schema_output =
            prepare_schema(&self.dir, output, OUTPUT_SCHEMA_FILE_NAME, max_columns)?;
        Ok(())
    }

    /// Upload a data snapshot and record it in the custom metadata.
    pub fn snapshot_data(
        &mut self,
        storage: &dyn ObjectStorage,
        source: SnapshotSource<'_>,
        destination: &str,
        kind: DataKind,
    ) -> ArtifactResult<Vec<StorageUri>> {
        snapshot::snapshot_data(storage, &mut self.custom_metadata, source, destination, kind)
    }

    pub fn list_files(&self) -> ArtifactResult<Vec<String>> {
        files::list_files(&self.dir)
    }

    pub fn install_requirements(
        &self,
        packages: &dyn PackageIndex,
        strategy: ConflictStrategy,
    ) -> ArtifactResult<InstallReport> {
        requirements::install_requirements(&self.dir, self.is_legacy(), packages, strategy)
    }

    /// Run `input` through the loaded score module.
    pub fn verify(&self, input: score::VerifyInput) -> ArtifactResult<score::VerifyOutput> {
        match (&self.score, &self.model) {
            (Some(module), Some(model)) => score::verify(module.as_ref(), model.as_ref(), input),
            _ => Err(ArtifactError::ScoreModule(
                "the model is not loaded; reload the artifact with a score loader first".into(),
            )),
        }
    }

    /// Run the introspection rules and record their results.
    pub fn introspect(&mut self, introspector: &dyn Introspector) -> ArtifactResult<IntrospectionReport> {
        publish::introspect(Some(introspector), &self.dir, &mut self.taxonomy_metadata)
    }

    /// Check the bundle and publish it through `gate`.
    pub fn save(
        &mut self,
        gate: &PublishGate<'_>,
        opts: &SaveOptions,
        progress: &mut dyn Progress,
    ) -> ArtifactResult<SaveOutcome> {
        let parts = BundleParts {
            dir: &self.dir,
            options: &self.options,
            custom_metadata: &mut self.custom_metadata,
            taxonomy_metadata: &mut self.taxonomy_metadata,
            input_schema: &self.schema_input,
            output_schema: &self.schema_output,
        };
        gate.save(parts, opts, progress)
    }

    /// The loaded model, if any. Model specific members are reached through it.
    pub fn model(&self) -> Option<&dyn ModelHandle> {
        self.model.as_deref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &ArtifactOptions {
        &self.options
    }

    pub fn session(&self) -> &SessionCfg {
        &self.cfg
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn generation(&self) -> FormatGeneration {
        self.generation
    }

    pub fn is_legacy(&self) -> bool {
        is_legacy_version(&self.version)
    }

    pub fn vm_id(&self) -> Option<&str> {
        self.vm_id.as_deref()
    }

    pub fn conda_env(&self) -> Option<&str> {
        self.conda_env.as_deref()
    }

    pub fn serialization_format(&self) -> Option<&str> {
        self.serialization_format.as_deref()
    }
}

impl fmt::Display for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Artifact directory: {}", self.dir.display())?;
        write!(f, "Contains:")?;
        for file in self.list_files().unwrap_or_default() {
            write!(f, "\n  {file}")?;
        }
        Ok(())
    }
}

/// Extension of `model_file_name`, lower-cased, without the dot.
pub fn detect_serialization_format(model_file_name: &str) -> Option<String> {
    Path::new(model_file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Infer the schema of `sample` and write it to `file_name`.
///
/// The side file is written for every inferred schema, oversized or not.
/// Only the publish gate limits side files to schemas over the size limit.
/// An oversized schema comes back empty, so the catalog copy is dropped and
/// the side file is the only copy.
fn prepare_schema(
    dir: &Path,
    sample: Option<&TabularSample>,
    file_name: &str,
    max_columns: usize,
) -> ArtifactResult<Schema> {
    let Some(sample) = sample else {
        return Ok(Schema::default());
    };
    let schema = match schema::infer(sample, max_columns) {
        Ok(schema) => schema,
        Err(ArtifactError::DataTooWide { columns, max }) => {
            warn!(
                columns,
                max,
                file = file_name,
                "the data has too many columns to generate a schema; raise `max_columns` to \
                 generate it"
            );
            return Ok(Schema::default());
        }
        Err(err) => return Err(err),
    };
    schema.to_json_file(&dir.join(file_name))?;
    if let Err(ArtifactError::SchemaTooLarge { size, limit }) = schema.validate_size() {
        warn!(
            size,
            limit,
            file = file_name,
            "the schema is too large for catalog metadata; it is only kept in the side file"
        );
        return Ok(Schema::default());
    }
    Ok(schema)
}
