// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use anemo_nn::{
    load_bincode, save_bincode, save_json, Adam, BatchNorm, BinaryCrossEntropy, Conv2d,
    GlobalAvgPool2d, Linear, Loss, Module, Sequential, Sigmoid, Swish, Tensor,
};

fn conv_classifier(seed: u64) -> Sequential {
    let mut seq = Sequential::new();
    seq.push(
        "conv",
        Conv2d::new("conv", 1, 2, (3, 3), (1, 1), (1, 1), (4, 4), Some(seed)).unwrap(),
    );
    seq.push("bn", BatchNorm::new_2d("bn", 2, (4, 4)).unwrap());
    seq.push("act", Swish::new());
    seq.push("pool", GlobalAvgPool2d::new(2, (4, 4)).unwrap());
    seq.push("fc", Linear::with_seed("fc", 2, 1, Some(seed + 1)).unwrap());
    seq.push("out", Sigmoid::new());
    seq
}

fn brightness_batch() -> (Tensor, Tensor) {
    let mut data = Vec::new();
    let mut labels = Vec::new();
    for idx in 0..8 {
        let bright = idx % 2 == 1;
        let base = if bright { 0.8 } else { -0.8 };
        for px in 0..16 {
            data.push(base + 0.05 * ((px + idx) % 3) as f32);
        }
        labels.push(if bright { 1.0 } else { 0.0 });
    }
    (
        Tensor::from_vec(8, 16, data).unwrap(),
        Tensor::from_vec(8, 1, labels).unwrap(),
    )
}

#[test]
fn adam_and_bce_reduce_loss_on_separable_batch() {
    let mut model = conv_classifier(3);
    let (inputs, labels) = brightness_batch();
    let mut loss_fn = BinaryCrossEntropy::new();
    let mut adam = Adam::new(0.05).unwrap();

    // Batch statistics on both ends keep the comparison independent of the
    // running averages.
    model.set_training(true);
    let initial = loss_fn
        .forward(&model.forward(&inputs).unwrap(), &labels)
        .unwrap()
        .data()[0];

    for _ in 0..60 {
        let trace = model.trace(&inputs).unwrap();
        let grad = loss_fn.backward(trace.output(), &labels).unwrap();
        model.backward_with_trace(&trace, &grad).unwrap();
        adam.step(&mut model, &|_| true).unwrap();
        model.zero_accumulators().unwrap();
    }

    let trained = loss_fn
        .forward(&model.forward(&inputs).unwrap(), &labels)
        .unwrap()
        .data()[0];
    assert!(trained < initial, "loss {initial} -> {trained}");
}

#[test]
fn bincode_snapshot_restores_parameters_and_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.bin");

    let source = conv_classifier(10);
    let (inputs, _) = brightness_batch();
    source.set_training(true);
    source.forward(&inputs).unwrap();
    source.set_training(false);
    save_bincode(&source, &path).unwrap();
    save_json(&source, dir.path().join("weights.json")).unwrap();

    let mut restored = conv_classifier(99);
    restored.set_training(false);
    assert_ne!(
        restored.forward(&inputs).unwrap(),
        source.forward(&inputs).unwrap()
    );
    load_bincode(&mut restored, &path).unwrap();
    assert_eq!(
        restored.forward(&inputs).unwrap(),
        source.forward(&inputs).unwrap()
    );
}
