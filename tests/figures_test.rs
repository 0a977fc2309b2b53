mod common;

use common::{Fixture, N_CLUSTER, VIDEOS};
use motif_worker::PipelineError;
use motif_worker::config::Parametrization;
use motif_worker::figure::Panel;
use motif_worker::pipeline::{
    CommunityOptions, GenerativeMode, GenerativeOptions, LabelKind, VisualizationOptions,
};
use rstest::rstest;

fn analysed(parametrization: Parametrization) -> Fixture {
    let fixture = Fixture::new(parametrization);
    let pipeline = fixture.pipeline();
    pipeline.pose_segmentation().expect("segmentation");
    pipeline
        .community(&CommunityOptions {
            cut_tree: 1,
            ..CommunityOptions::default()
        })
        .expect("community");
    fixture
}

#[rstest]
#[case(LabelKind::None)]
#[case(LabelKind::Motif)]
#[case(LabelKind::Community)]
fn visualization_colours_by_requested_label(#[case] label: LabelKind) {
    let fixture = analysed(Parametrization::Hmm);
    let options = VisualizationOptions {
        label,
        video: Some(VIDEOS[1].to_string()),
        save_logs: false,
    };
    let figure = fixture.pipeline().visualization(&options).expect("figure");

    let [Panel::Scatter { points, labels, .. }] = figure.panels.as_slice() else {
        panic!("expected one scatter panel");
    };
    assert_eq!(points.len(), fixture.config.num_points);
    assert_eq!(labels.is_some(), label != LabelKind::None);

    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("latent.png");
    figure.save_png(&png).expect("render");
    assert!(png.is_file());
}

#[test]
fn visualization_rejects_unknown_video() {
    let fixture = analysed(Parametrization::Hmm);
    let options = VisualizationOptions {
        video: Some("unknown".into()),
        ..VisualizationOptions::default()
    };
    assert!(matches!(
        fixture.pipeline().visualization(&options),
        Err(PipelineError::InvalidOption { name: "video", .. })
    ));
}

#[rstest]
#[case(GenerativeMode::Sampling, 5)]
#[case(GenerativeMode::Reconstruction, 10)]
fn generative_panel_counts(#[case] mode: GenerativeMode, #[case] panels: usize) {
    let fixture = analysed(Parametrization::Hmm);
    let options = GenerativeOptions {
        mode,
        samples: 5,
        ..GenerativeOptions::default()
    };
    let figure = fixture.pipeline().generative_model(&options).expect("figure");
    assert_eq!(figure.panels.len(), panels);
    assert!(figure.panels.iter().all(|panel| matches!(
        panel,
        Panel::Lines { series, .. } if series.len() == 4 && series[0].len() == common::TIME_WINDOW
    )));
}

#[test]
fn motif_means_cover_used_motifs() {
    let fixture = analysed(Parametrization::Hmm);
    let options = GenerativeOptions {
        mode: GenerativeMode::Motifs,
        ..GenerativeOptions::default()
    };
    let figure = fixture.pipeline().generative_model(&options).expect("figure");
    assert!(!figure.panels.is_empty() && figure.panels.len() <= N_CLUSTER);
}

#[test]
fn centers_decode_kmeans_centroids() {
    let fixture = analysed(Parametrization::Kmeans);
    let options = GenerativeOptions {
        mode: GenerativeMode::Centers,
        ..GenerativeOptions::default()
    };
    let figure = fixture.pipeline().generative_model(&options).expect("figure");
    assert_eq!(figure.panels.len(), N_CLUSTER);
}

#[test]
fn centers_are_unsupported_for_hmm() {
    let fixture = analysed(Parametrization::Hmm);
    let options = GenerativeOptions {
        mode: GenerativeMode::Centers,
        ..GenerativeOptions::default()
    };
    let err = fixture.pipeline().generative_model(&options).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnsupportedMode { ref mode, ref parametrization }
            if mode == "centers" && parametrization == "hmm"
    ));
}

#[test]
fn generative_model_requires_trained_model() {
    let fixture = Fixture::new(Parametrization::Hmm);
    std::fs::remove_file(fixture.layout().model_path()).unwrap();
    let err = fixture
        .pipeline()
        .generative_model(&GenerativeOptions::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingModel { .. }));
}
