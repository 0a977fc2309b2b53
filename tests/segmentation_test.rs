mod common;

use std::fs;

use common::{FRAMES, Fixture, N_CLUSTER, TIME_WINDOW, VIDEOS};
use motif_worker::config::Parametrization;
use motif_worker::contract::{self, ContractOptions};
use motif_worker::layout::{Artifact, ProjectLayout, Stage};
use motif_worker::pipeline::Overwrite;
use motif_worker::store::{read_f32_matrix, read_i32_vector, read_i64_vector};
use motif_worker::{PipelineError, ProjectConfig};
use rstest::rstest;

#[test]
fn resolver_is_deterministic_and_collision_free() {
    let fixture = Fixture::new(Parametrization::Hmm);
    let first = fixture.layout();
    let second = ProjectLayout::new(&ProjectConfig::load(&fixture.config_path).unwrap()).unwrap();

    let a = first.artifact(VIDEOS[0], &Artifact::MotifLabel);
    assert_eq!(a, second.artifact(VIDEOS[0], &Artifact::MotifLabel));
    assert_ne!(a, first.artifact(VIDEOS[1], &Artifact::MotifLabel));
    assert!(a.ends_with(format!(
        "results/{}/VAME/hmm-{N_CLUSTER}/{N_CLUSTER}_hmm_label_{}.npy",
        VIDEOS[0], VIDEOS[0]
    )));
}

#[rstest]
#[case(Parametrization::Hmm, true)]
#[case(Parametrization::Hmm, false)]
#[case(Parametrization::Kmeans, true)]
#[case(Parametrization::Kmeans, false)]
fn segmentation_writes_every_artifact(
    #[case] parametrization: Parametrization,
    #[case] individual: bool,
) {
    let mut fixture = Fixture::new(parametrization);
    fixture.update(|c| c.individual_parametrization = individual);
    let report = fixture.pipeline().pose_segmentation().expect("segmentation");

    assert!(!report.skipped);
    let per_video = if parametrization == Parametrization::Kmeans { 4 } else { 3 };
    assert_eq!(report.artifacts.len(), per_video * VIDEOS.len());

    let layout = fixture.layout();
    let expected = contract::expectations(
        &layout,
        &fixture.config.video_sets,
        Stage::PoseSegmentation,
        &ContractOptions::default(),
    );
    assert!(contract::verify(&expected).is_empty());

    for video in VIDEOS {
        let latent = read_f32_matrix(&layout.artifact(video, &Artifact::LatentVector)).unwrap();
        assert_eq!(latent.dim(), (FRAMES - TIME_WINDOW, 3));

        let labels = read_i32_vector(&layout.artifact(video, &Artifact::MotifLabel)).unwrap();
        assert_eq!(labels.len(), FRAMES - TIME_WINDOW);
        assert!(labels.iter().all(|&l| (0..N_CLUSTER as i32).contains(&l)));

        let usage = read_i64_vector(&layout.artifact(video, &Artifact::MotifUsage)).unwrap();
        assert_eq!(usage.len(), N_CLUSTER);
        assert_eq!(usage.sum(), (FRAMES - TIME_WINDOW) as i64);

        let centers = layout.artifact(video, &Artifact::ClusterCenter);
        assert_eq!(centers.is_file(), parametrization == Parametrization::Kmeans);
        assert_eq!(
            report.count(&format!("windows.{video}")),
            Some(FRAMES - TIME_WINDOW)
        );
    }
}

#[rstest]
#[case(Parametrization::Kmeans)]
#[case(Parametrization::Hmm)]
fn zero_kmeans_iterations_still_labels_every_window(#[case] parametrization: Parametrization) {
    let mut fixture = Fixture::new(parametrization);
    fixture.update(|c| c.kmeans_max_iterations = 0);
    fixture.pipeline().pose_segmentation().expect("segmentation");

    let layout = fixture.layout();
    for video in VIDEOS {
        let labels = read_i32_vector(&layout.artifact(video, &Artifact::MotifLabel)).unwrap();
        assert_eq!(labels.len(), FRAMES - TIME_WINDOW);
        assert!(labels.iter().all(|&l| (0..N_CLUSTER as i32).contains(&l)));
    }
}

#[test]
fn declined_overwrite_leaves_results_untouched() {
    let fixture = Fixture::new(Parametrization::Kmeans);
    fixture.pipeline().pose_segmentation().expect("first run");
    let path = fixture.layout().artifact(VIDEOS[0], &Artifact::LatentVector);
    let before = fs::read(&path).unwrap();

    // Different seed would change the labels if the stage ran again.
    let mut fixture = fixture;
    fixture.update(|c| c.random_state = 7);
    let report = fixture
        .pipeline_with(Overwrite(false))
        .pose_segmentation()
        .expect("second run");

    assert!(report.skipped);
    assert!(report.artifacts.is_empty());
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn missing_model_is_reported() {
    let fixture = Fixture::new(Parametrization::Hmm);
    let model = fixture.layout().model_path();
    fs::remove_file(&model).unwrap();

    let err = fixture.pipeline().pose_segmentation().unwrap_err();
    match err {
        PipelineError::MissingModel { model_name, path } => {
            assert_eq!(model_name, "VAME");
            assert_eq!(path, model);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fixture.layout().results_dir(VIDEOS[0]).exists());
}

#[test]
fn short_pose_series_fails_without_partial_results() {
    let fixture = Fixture::new(Parametrization::Hmm);
    let layout = fixture.layout();
    let short = ndarray::Array2::<f32>::zeros((4, TIME_WINDOW));
    ndarray_npy::write_npy(layout.pose_data(VIDEOS[1]), &short).unwrap();

    let err = fixture.pipeline().pose_segmentation().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InsufficientFrames { ref video, available, .. }
            if video == VIDEOS[1] && available == TIME_WINDOW
    ));
    assert!(!layout.artifact(VIDEOS[0], &Artifact::LatentVector).exists());
}

#[test]
fn save_logs_writes_stage_log() {
    let mut fixture = Fixture::new(Parametrization::Kmeans);
    fixture.update(|c| c.save_logs = true);
    fixture.pipeline().pose_segmentation().expect("segmentation");
    let log = fixture.layout().log_file(Stage::PoseSegmentation);
    let contents = fs::read_to_string(log).expect("log file");
    assert!(contents.contains("pose segmentation finished"));
}
