//! Shared fixture for unit tests: a temp store, a target tree, a mock engine,
//! and a controllable clock.

use crate::clock::FixedClock;
use crate::pipeline::ValidatorPipeline;
use crate::stage::Stage;
use chrono::Utc;
use sluice_engine::MockEngine;
use sluice_schema::OwnerId;
use sluice_store::StoreLayout;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) struct Fixture {
    pub dir: tempfile::TempDir,
    pub layout: StoreLayout,
    pub target: PathBuf,
    pub engine: Arc<MockEngine>,
    pub clock: Arc<FixedClock>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(target.join("sites/default")).unwrap();
        fs::write(target.join("index.php"), "<?php // v1").unwrap();
        let layout = StoreLayout::new(dir.path().join("state"));
        layout.initialize().unwrap();
        Self {
            dir,
            layout,
            target,
            engine: Arc::new(MockEngine::new()),
            clock: Arc::new(FixedClock::new(Utc::now())),
        }
    }

    pub fn stage(&self, owner: &str) -> Stage {
        self.stage_with(owner, ValidatorPipeline::new())
    }

    pub fn stage_with(&self, owner: &str, pipeline: ValidatorPipeline) -> Stage {
        Stage::new(
            sluice_schema::stage_type!("test"),
            OwnerId::new(owner),
            &self.layout,
            &self.target,
            self.engine.clone(),
        )
        .with_pipeline(pipeline)
        .with_clock(self.clock.clone())
    }
}
