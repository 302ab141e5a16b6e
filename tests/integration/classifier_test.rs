use whybusy::core::monitor::{
    classify, classify_gpu_process, classify_system_process, ClassifierScope, ProcessCategory,
    ProcessIdentity,
};

#[test]
fn test_miner_by_command_line() {
    let result = classify_gpu_process(
        "svchost",
        Some("/tmp/.cache/xmrig -o stratum+tcp://pool.example:3333"),
        None,
    );
    assert_eq!(result.category, ProcessCategory::Miner);
    assert!(result.is_suspected_miner);
    assert!(result.confidence >= 0.9);
}

#[test]
fn test_ml_training_detected() {
    let result = classify_gpu_process("python", Some("python train.py --model resnet"), None);
    assert_eq!(result.category, ProcessCategory::MlTraining);
    assert!(result.is_ml_training);
    assert!(!result.is_suspected_miner);
}

#[test]
fn test_gpu_scope_skips_system_groups() {
    let gpu = classify_gpu_process("rsync", Some("rsync -a /home /mnt/backup"), None);
    assert_eq!(gpu.category, ProcessCategory::Unknown);

    let system = classify_system_process("rsync", Some("rsync -a /home /mnt/backup"), None);
    assert_eq!(system.category, ProcessCategory::Backup);
}

#[test]
fn test_empty_identity_is_unknown() {
    let result = classify(&ProcessIdentity::default(), ClassifierScope::System);
    assert_eq!(result.category, ProcessCategory::Unknown);
    assert_eq!(result.confidence, 0.0);
}

#[test]
fn test_matching_is_case_insensitive() {
    let identity = ProcessIdentity::new("FFMPEG.EXE");
    let result = classify(&identity, ClassifierScope::Gpu);
    assert_eq!(result.category, ProcessCategory::VideoProcessing);
    assert!(result.is_video_processing);
}
