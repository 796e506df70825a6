//! GeoNet: gated fusion of an image embedding and a tabular embedding
//!
//! Both modalities are projected into a shared `fusion_dim` space. A small
//! gate network looks at the two projections side by side and produces a
//! per-example softmax over `[image, tabular]`. The fused vector is the
//! convex combination of the projections, which the classifier head turns
//! into logits.

use burn::{
    module::Module,
    nn::{Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use super::backbone::ImageBackbone;
use super::config::GeoNetConfig;
use super::{CLASSIFIER_HIDDEN, GATE_HIDDEN, TABULAR_EMBEDDING_DIM, TABULAR_HIDDEN};

/// Two-layer MLP over the soil/weather feature vector
#[derive(Module, Debug)]
pub struct TabularEncoder<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> TabularEncoder<B> {
    pub fn new(num_features: usize, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(num_features, TABULAR_HIDDEN).init(device),
            fc2: LinearConfig::new(TABULAR_HIDDEN, TABULAR_EMBEDDING_DIM).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(features));
        self.relu.forward(self.fc2.forward(x))
    }

    /// Number of features the first layer expects
    pub fn input_width(&self) -> usize {
        self.fc1.weight.val().dims()[0]
    }
}

/// Learns per-example mixture weights over the two modalities
#[derive(Module, Debug)]
pub struct GateNetwork<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> GateNetwork<B> {
    pub fn new(fusion_dim: usize, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(fusion_dim * 2, GATE_HIDDEN).init(device),
            fc2: LinearConfig::new(GATE_HIDDEN, 2).init(device),
            relu: Relu::new(),
        }
    }

    /// # Arguments
    /// * `combined` - Concatenated projections, shape [batch_size, 2 * fusion_dim]
    ///
    /// # Returns
    /// * Softmax weights of shape [batch_size, 2]; column 0 is the image weight
    pub fn forward(&self, combined: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(combined));
        softmax(self.fc2.forward(x), 1)
    }
}

/// Classifier head over the fused representation
#[derive(Module, Debug)]
pub struct FusionClassifier<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> FusionClassifier<B> {
    pub fn new(fusion_dim: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(fusion_dim, CLASSIFIER_HIDDEN).init(device),
            fc2: LinearConfig::new(CLASSIFIER_HIDDEN, num_classes).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, fused: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(fused));
        self.fc2.forward(x)
    }

    /// Number of classes the head produces logits for
    pub fn output_width(&self) -> usize {
        self.fc2.weight.val().dims()[1]
    }
}

/// Raw outputs of one forward pass
#[derive(Debug, Clone)]
pub struct GeoNetOutput<B: Backend> {
    /// Unnormalized class scores, shape [batch_size, num_classes]
    pub logits: Tensor<B, 2>,
    /// Gate softmax, shape [batch_size, 2] as `[w_img, w_tab]`
    pub gate_weights: Tensor<B, 2>,
}

/// Gated multimodal crop classifier
#[derive(Module, Debug)]
pub struct GeoNet<B: Backend> {
    pub backbone: ImageBackbone<B>,
    pub tabular: TabularEncoder<B>,
    pub image_projection: Linear<B>,
    pub tabular_projection: Linear<B>,
    pub gate: GateNetwork<B>,
    pub classifier: FusionClassifier<B>,
}

impl<B: Backend> GeoNet<B> {
    /// Create a new GeoNet from configuration
    pub fn new(config: &GeoNetConfig, device: &B::Device) -> Self {
        let backbone = ImageBackbone::new(config.in_channels, config.base_filters, device);
        let image_projection =
            LinearConfig::new(backbone.embedding_dim(), config.fusion_dim).init(device);

        Self {
            backbone,
            tabular: TabularEncoder::new(config.num_tabular_features, device),
            image_projection,
            tabular_projection: LinearConfig::new(TABULAR_EMBEDDING_DIM, config.fusion_dim)
                .init(device),
            gate: GateNetwork::new(config.fusion_dim, device),
            classifier: FusionClassifier::new(config.fusion_dim, config.num_classes, device),
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `images` - Normalized images of shape [batch_size, 3, height, width]
    /// * `features` - Tabular features of shape [batch_size, num_tabular_features]
    pub fn forward(&self, images: Tensor<B, 4>, features: Tensor<B, 2>) -> GeoNetOutput<B> {
        let image_emb = self.image_projection.forward(self.backbone.forward(images));
        let tab_emb = self
            .tabular_projection
            .forward(self.tabular.forward(features));

        let combined = Tensor::cat(vec![image_emb.clone(), tab_emb.clone()], 1);
        let gate_weights = self.gate.forward(combined);

        let [batch_size, fusion_dim] = image_emb.dims();
        let w_img = gate_weights
            .clone()
            .slice([0..batch_size, 0..1])
            .repeat_dim(1, fusion_dim);
        let w_tab = gate_weights
            .clone()
            .slice([0..batch_size, 1..2])
            .repeat_dim(1, fusion_dim);

        let fused = image_emb * w_img + tab_emb * w_tab;
        let logits = self.classifier.forward(fused);

        GeoNetOutput {
            logits,
            gate_weights,
        }
    }

    /// Number of tabular features the loaded weights accept
    pub fn tabular_input_width(&self) -> usize {
        self.tabular.input_width()
    }

    /// Number of classes the loaded weights predict
    pub fn output_width(&self) -> usize {
        self.classifier.output_width()
    }

    /// Width of the backbone embedding the image projection accepts
    pub fn image_embedding_width(&self) -> usize {
        self.image_projection.weight.val().dims()[0]
    }
}
