// Tests for backward propagation: error accumulation, reset rules, pooling
// routing and convolution filter gradients.

use approx::assert_relative_eq;
use cellnet::layers::{
    Cell, CellInput, Conv3x3Layer, DenseLayer, LayerOps, LayerTransform, MapSource,
    MaxPool2x2Layer,
};
use cellnet::utils::{Activation, Loss};
use cellnet::Network;

// 2 linear input cells -> 2 linear output cells with known weights.
fn two_by_two() -> Network {
    let input = Cell::new(2, Some(CellInput::Data), None, 0.0, None).unwrap();
    let mut hidden = DenseLayer::new(2, &input).unwrap();
    hidden.cell_mut(0).unwrap().weights_mut().copy_from_slice(&[1.0, 0.0]);
    hidden.cell_mut(1).unwrap().weights_mut().copy_from_slice(&[0.0, 1.0]);

    let derived = Cell::new(2, Some(CellInput::all_cells(0, 2)), None, 0.0, None).unwrap();
    let mut out = DenseLayer::new(2, &derived).unwrap();
    out.cell_mut(0).unwrap().weights_mut().copy_from_slice(&[0.5, -1.0]);
    out.cell_mut(1).unwrap().weights_mut().copy_from_slice(&[2.0, 0.25]);

    Network::new(vec![hidden.into(), out.into()]).unwrap()
}

// Inner 4x4 block of a 6x6 input; the outer ring is constant.
fn framed(inner: [[f64; 4]; 4]) -> Vec<f64> {
    let mut input = vec![0.5; 36];
    for (i, row) in inner.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            input[(i + 1) * 6 + j + 1] = *v;
        }
    }
    input
}

// conv (identity centre tap) -> pool -> one linear cell with weights 1..4
fn conv_pool_cell() -> Network {
    let mut conv = Conv3x3Layer::new(1, 6, 6, MapSource::Data).unwrap();
    conv.filters_mut()[4] = 1.0;
    let pool = MaxPool2x2Layer::after_conv(&conv, 0).unwrap();
    let cell = Cell::new(
        4,
        Some(CellInput::Maps { layer: 1 }),
        Some(&[1.0, 2.0, 3.0, 4.0]),
        0.0,
        None,
    )
    .unwrap();
    Network::new(vec![
        conv.into(),
        pool.into(),
        DenseLayer::new(1, &cell).unwrap().into(),
    ])
    .unwrap()
}

mod accumulation_tests {
    use super::*;

    #[test]
    fn test_hidden_error_is_weighted_sum_of_downstream_errors() {
        let mut net = two_by_two();
        net.set_input(&[1.0, 2.0]);
        net.forward_with_loss(&[0.0, 1.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();

        let out = net.layer(1).unwrap().as_dense().unwrap();
        let e0 = out.cell(0).unwrap().error();
        let e1 = out.cell(1).unwrap().error();
        // outputs: 0.5*1 - 1*2 = -1.5 and 2*1 + 0.25*2 = 2.5
        assert_relative_eq!(e0, -1.5);
        assert_relative_eq!(e1, 1.5);

        let hidden = net.layer(0).unwrap().as_dense().unwrap();
        assert_relative_eq!(hidden.cell(0).unwrap().error(), 0.5 * e0 + 2.0 * e1);
        assert_relative_eq!(hidden.cell(1).unwrap().error(), -1.0 * e0 + 0.25 * e1);
    }

    #[test]
    fn test_repeated_backward_does_not_double_count() {
        let mut net = two_by_two();
        net.set_input(&[1.0, 2.0]);
        net.forward_with_loss(&[0.0, 1.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        let first = net.layer(0).unwrap().as_dense().unwrap().cell(0).unwrap().error();
        net.backward().unwrap();
        let second = net.layer(0).unwrap().as_dense().unwrap().cell(0).unwrap().error();
        assert_relative_eq!(first, second);
    }

    #[test]
    fn test_terminal_error_survives_backward() {
        let mut net = two_by_two();
        net.set_input(&[1.0, 2.0]);
        net.forward_with_loss(&[0.0, 1.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        let out = net.layer(1).unwrap().as_dense().unwrap();
        assert_relative_eq!(out.cell(0).unwrap().error(), -1.5);
    }

    #[test]
    fn test_activation_derivative_applied_once() {
        let cell = Cell::new(
            1,
            Some(CellInput::Data),
            Some(&[1.0]),
            0.0,
            Some(Activation::Sigmoid),
        )
        .unwrap();
        let mut net = Network::new(vec![DenseLayer::new(1, &cell).unwrap().into()]).unwrap();
        net.set_input(&[0.0]);
        net.forward_with_loss(&[1.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        // (0.5 - 1) * 0.25
        let error = net.output_layer().unwrap().cell(0).unwrap().error();
        assert_relative_eq!(error, -0.125);
    }

    #[test]
    fn test_backward_leaves_parameters_alone() {
        let mut net = two_by_two();
        let before: Vec<Vec<f64>> = net
            .output_layer()
            .unwrap()
            .cells()
            .iter()
            .map(|c| c.weights().to_vec())
            .collect();
        net.set_input(&[1.0, 2.0]);
        net.forward_with_loss(&[0.0, 1.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        let after: Vec<Vec<f64>> = net
            .output_layer()
            .unwrap()
            .cells()
            .iter()
            .map(|c| c.weights().to_vec())
            .collect();
        assert_eq!(before, after);
    }
}

mod softmax_tests {
    use super::*;

    #[test]
    fn test_cross_entropy_shortcut_matches_first_principles() {
        let cell = Cell::new(2, Some(CellInput::Data), None, 0.0, None).unwrap();
        let mut layer = DenseLayer::new(3, &cell)
            .unwrap()
            .with_transform(LayerTransform::Softmax)
            .unwrap();
        let weights = [[0.3, -0.2], [0.1, 0.7], [-0.5, 0.4]];
        for (i, w) in weights.iter().enumerate() {
            layer.cell_mut(i).unwrap().weights_mut().copy_from_slice(w);
        }
        let mut net = Network::new(vec![layer.into()]).unwrap();
        let targets = [0.0, 1.0, 0.0];

        net.set_input(&[1.0, -2.0]);
        net.forward_with_loss(&targets, Loss::CrossEntropy).unwrap();
        net.backward().unwrap();

        let y = net.outputs();
        let t_sum: f64 = targets.iter().sum();
        let dense = net.output_layer().unwrap();
        for i in 0..3 {
            // dE/dsum_i = Σ_k (-t_k / y_k) * y_k * (δ_ki - y_i)
            let first_principles = y[i] * t_sum - targets[i];
            assert_relative_eq!(
                dense.cell(i).unwrap().error(),
                first_principles,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_cross_entropy_loss_value() {
        let cell = Cell::new(1, Some(CellInput::Data), None, 0.0, None).unwrap();
        let layer = DenseLayer::new(2, &cell)
            .unwrap()
            .with_transform(LayerTransform::Softmax)
            .unwrap();
        let mut net = Network::new(vec![layer.into()]).unwrap();
        net.set_input(&[1.0]);
        // zero weights: both outputs 0.5, mean of (-ln 0.5 + 0) over 2 units
        let loss = net.forward_with_loss(&[1.0, 0.0], Loss::CrossEntropy).unwrap();
        assert_relative_eq!(loss, std::f64::consts::LN_2 / 2.0, epsilon = 1e-12);
    }
}

mod pooling_tests {
    use super::*;

    #[test]
    fn test_errors_route_to_block_maxima() {
        let mut net = conv_pool_cell();
        let input = framed([
            [1.0, 2.0, 5.0, 0.0],
            [3.0, 4.0, 1.0, 1.0],
            [0.0, 0.0, 7.0, 8.0],
            [9.0, 0.0, 6.0, 2.0],
        ]);
        net.set_input(&input);
        // pooled [4, 5, 9, 8], output 4 + 10 + 27 + 32 = 73
        net.forward_with_loss(&[72.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();

        let pool = net.layer(1).unwrap().as_pool().unwrap();
        assert_eq!(pool.outputs(), &[4.0, 5.0, 9.0, 8.0]);
        assert_eq!(pool.errors(), &[1.0, 2.0, 3.0, 4.0]);

        let conv = net.layer(0).unwrap().as_conv().unwrap();
        let mut expected = [0.0; 16];
        expected[5] = 1.0;
        expected[2] = 2.0;
        expected[12] = 3.0;
        expected[11] = 4.0;
        assert_eq!(conv.errors(), &expected);
    }

    #[test]
    fn test_ties_route_to_every_tied_position() {
        let mut net = conv_pool_cell();
        let input = framed([
            [3.0, 3.0, 0.0, 0.0],
            [3.0, 3.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
        ]);
        net.set_input(&input);
        net.forward_with_loss(&[2.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();

        // output 3 * 1, error 1, first pooled error 1 * 1
        let conv = net.layer(0).unwrap().as_conv().unwrap();
        for &idx in &[0, 1, 4, 5] {
            assert_relative_eq!(conv.errors()[idx], 1.0);
        }
        // second block is all zeros: its pooled error (2) goes to all four
        for &idx in &[2, 3, 6, 7] {
            assert_relative_eq!(conv.errors()[idx], 2.0);
        }
    }

    #[test]
    fn test_route_error_leaves_non_max_positions_untouched() {
        let mut pool = MaxPool2x2Layer::new(1, 4, 4, MapSource::Data).unwrap();
        let input: Vec<f64> = (0..16).map(|i| i as f64).collect();
        pool.forward(&input, &[]).unwrap();
        pool.errors_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        let mut upstream = vec![0.0; 16];
        pool.route_error(&input, &mut upstream).unwrap();
        let routed: Vec<usize> = (0..16).filter(|&i| upstream[i] != 0.0).collect();
        assert_eq!(routed, vec![5, 7, 13, 15]);
    }
}

mod conv_gradient_tests {
    use super::*;

    #[test]
    fn test_filter_gradient_matches_numeric() {
        let input = framed([
            [1.0, 2.0, 5.0, 0.0],
            [3.0, 4.0, 1.0, 1.0],
            [0.0, 0.0, 7.0, 8.0],
            [9.0, 0.0, 6.0, 2.0],
        ]);
        let targets = [70.0];
        let mut net = conv_pool_cell();
        net.set_input(&input);
        net.forward_with_loss(&targets, Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        let analytic = net.layer(0).unwrap().as_conv().unwrap().grads().to_vec();

        let eps = 1e-6;
        for tap in 0..9 {
            let mut shifted = conv_pool_cell();
            shifted.set_input(&input);
            shifted.layer_mut(0).unwrap().as_conv_mut().unwrap().filters_mut()[tap] += eps;
            let plus = shifted
                .forward_with_loss(&targets, Loss::MeanSquaredError)
                .unwrap();
            shifted.layer_mut(0).unwrap().as_conv_mut().unwrap().filters_mut()[tap] -= 2.0 * eps;
            let minus = shifted
                .forward_with_loss(&targets, Loss::MeanSquaredError)
                .unwrap();
            let numeric = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(analytic[tap], numeric, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_filter_gradient_cleared_every_backward() {
        let mut net = conv_pool_cell();
        net.set_input(&framed([[1.0; 4]; 4]));
        net.forward_with_loss(&[0.0], Loss::MeanSquaredError)
            .unwrap();
        net.backward().unwrap();
        let first = net.layer(0).unwrap().as_conv().unwrap().grads().to_vec();
        net.backward().unwrap();
        let second = net.layer(0).unwrap().as_conv().unwrap().grads().to_vec();
        assert_eq!(first, second);
    }
}
