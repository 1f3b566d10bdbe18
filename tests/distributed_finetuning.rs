use dist_finetune::{
    cleanup, gpu_tensor_operation, process_batch, setup, Backend, BatchError, CustomDataset,
    DatasetError, Device, OpError, ProcessGroup, RendezvousConfig,
};

use std::cell::Cell;
use std::time::Duration;

// Single machine, rank 0 of a two-process group.
fn group() -> ProcessGroup {
    let config = RendezvousConfig {
        master_addr: "distributed-finetuning-test".to_string(),
        master_port: 12355,
        backend: Backend::Local,
        timeout: Duration::from_secs(1),
    };
    setup(0, 2, &config).expect("setup")
}

#[test]
fn custom_dataset() {
    let texts = vec!["text1", "text2", "text3"];
    let labels = vec![0, 1, 0];
    let dataset = CustomDataset::new(texts, labels).unwrap();
    assert_eq!(dataset.len(), 3);
    assert_eq!(dataset.get(1).unwrap().text, "text2");
    assert_eq!(dataset.get(1).unwrap().label, 1);
    assert!(matches!(
        dataset.get(3),
        Err(DatasetError::IndexOutOfRange { index: 3, len: 3 })
    ));
}

#[test]
fn process_batch_returns_scalar_loss() {
    let group = group();

    let calls = Cell::new(0);
    let mock_get_model_response = |_prompt: &str| {
        calls.set(calls.get() + 1);
        "mocked response".to_string()
    };

    let model = "dummy model";
    let prompts = ["prompt1", "prompt2"];
    let labels = [0, 1];
    let loss = process_batch(&model, &prompts, &labels, mock_get_model_response).unwrap();
    assert_eq!(loss.shape(), &[] as &[usize]);
    assert!(loss.item().unwrap().is_finite());
    assert_eq!(calls.get(), 2);

    assert_eq!(
        process_batch(&model, &[] as &[&str], &[], mock_get_model_response),
        Err(BatchError::EmptyBatch)
    );

    cleanup(group);
}

#[test]
fn gpu_tensor_operation_on_cpu() {
    assert_eq!(gpu_tensor_operation("test", Device::Cpu).unwrap(), 112.0);
    assert!(matches!(
        gpu_tensor_operation("", Device::Cpu),
        Err(OpError::EmptyInput)
    ));
}

#[test]
fn gpu_tensor_operation_on_gpu() {
    let device = Device::Gpu(0);
    if device.is_available() {
        let result = gpu_tensor_operation("test", device).unwrap();
        assert!(result.is_finite());
    } else {
        println!("GPU not available, skipping GPU test");
        assert!(matches!(
            gpu_tensor_operation("test", device),
            Err(OpError::DeviceUnavailable(_))
        ));
    }
}

#[test]
fn dataset_batches_feed_process_batch() {
    let texts: Vec<String> = (0..5).map(|i| format!("example {i}")).collect();
    let labels = vec![0, 1, 1, 0, 1];
    let dataset = CustomDataset::new(texts, labels).unwrap();

    let mut seen = Vec::new();
    for batch in dataset.shard(0, 1).unwrap().batches(2).unwrap() {
        let loss = process_batch(&(), &batch.prompts, &batch.labels, |p| {
            seen.push(p.to_string());
            String::new()
        })
        .unwrap();
        assert_eq!(loss.dim(), 0);
    }
    let expected: Vec<String> = dataset.iter().map(|e| e.text.clone()).collect();
    assert_eq!(seen, expected);
}
