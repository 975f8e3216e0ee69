use ndarray::{Array1, Array2, ArrayView1, Axis, concatenate};
use rand::Rng;

use super::{
    Model, ParameterLayout,
    activations::ActFn,
    layers::{Dense, DenseCache, Embedding},
};
use crate::{MlErr, Result, initialization::Initializer};

const EMBEDDING_STD_DEV: f32 = 0.01;

/// The hyperparameters of a `NeuMf` model.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuMfConfig {
    pub num_users: usize,
    pub num_items: usize,
    /// The embedding size of the matrix factorization branch.
    pub mf_dim: usize,
    /// The sizes of the MLP layers, the first one is split between the user and item embeddings.
    pub model_layers: Vec<usize>,
    pub mf_regularization: f32,
    /// One factor per MLP layer, the first one applies to the MLP embeddings.
    pub mlp_reg_layers: Vec<f32>,
}

/// Neural matrix factorization.
///
/// Combines a generalized matrix factorization branch (the element-wise product of a user
/// and an item embedding) with an MLP branch (the concatenated embeddings fed through
/// ReLU layers). Both outputs are concatenated and projected into a single logit.
#[derive(Debug, Clone)]
pub struct NeuMf {
    config: NeuMfConfig,
    layout: ParameterLayout,
    mf_user: Embedding,
    mf_item: Embedding,
    mlp_user: Embedding,
    mlp_item: Embedding,
    mlp: Vec<Dense>,
    output: Dense,
}

/// The forward metadata of a `NeuMf` model.
#[derive(Debug)]
pub struct NeuMfCache {
    users: Vec<u32>,
    items: Vec<u32>,
    mf_user: Array2<f32>,
    mf_item: Array2<f32>,
    mlp: Vec<DenseCache>,
    output: DenseCache,
}

impl NeuMf {
    /// Creates a new `NeuMf`.
    ///
    /// # Returns
    /// The model or an `InvalidArch` error if the configuration can't describe a model.
    pub fn new(config: NeuMfConfig) -> Result<Self> {
        Self::validate(&config)?;

        let mut layout = ParameterLayout::new();
        let mlp_dim = config.model_layers[0] / 2;

        let mf_user = Embedding::new(
            &mut layout,
            "mf_embedding_user",
            config.num_users,
            config.mf_dim,
        );
        let mf_item = Embedding::new(
            &mut layout,
            "mf_embedding_item",
            config.num_items,
            config.mf_dim,
        );
        let mlp_user = Embedding::new(&mut layout, "mlp_embedding_user", config.num_users, mlp_dim);
        let mlp_item = Embedding::new(&mut layout, "mlp_embedding_item", config.num_items, mlp_dim);

        let mlp = config
            .model_layers
            .windows(2)
            .enumerate()
            .map(|(i, dims)| {
                let name = format!("layer{}", i + 1);
                Dense::new(&mut layout, &name, (dims[0], dims[1]), Some(ActFn::relu()))
            })
            .collect();

        let last = config.model_layers[config.model_layers.len() - 1];
        let output = Dense::new(&mut layout, "rating", (config.mf_dim + last, 1), None);

        Ok(Self {
            config,
            layout,
            mf_user,
            mf_item,
            mlp_user,
            mlp_item,
            mlp,
            output,
        })
    }

    fn validate(config: &NeuMfConfig) -> Result<()> {
        let invalid = |msg: String| Err(MlErr::InvalidArch(msg));

        if config.num_users == 0 || config.num_items == 0 {
            return invalid("there must be at least one user and one item".into());
        }
        if config.mf_dim == 0 {
            return invalid("the matrix factorization dimension must be positive".into());
        }

        let Some(&first) = config.model_layers.first() else {
            return invalid("the MLP must have at least one layer".into());
        };

        if first == 0 || first % 2 != 0 {
            return invalid(format!(
                "the first MLP layer ({first}) must be even, it's split between users and items"
            ));
        }
        if config.model_layers.contains(&0) {
            return invalid("MLP layers must have at least one unit".into());
        }
        if config.mlp_reg_layers.len() != config.model_layers.len() {
            return invalid(format!(
                "there are {} MLP regularization factors for {} layers",
                config.mlp_reg_layers.len(),
                config.model_layers.len()
            ));
        }

        Ok(())
    }

    pub fn config(&self) -> &NeuMfConfig {
        &self.config
    }

    /// Generates a fresh set of parameters.
    ///
    /// Embeddings are drawn from N(0, 0.01), hidden kernels use Glorot uniform, the output
    /// kernel LeCun uniform and every bias starts at zero.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = vec![0.0; self.layout.len()];
        let embedding = Initializer::Normal {
            mean: 0.0,
            std_dev: EMBEDDING_STD_DEV,
        };

        for emb in [&self.mf_user, &self.mf_item, &self.mlp_user, &self.mlp_item] {
            let range = self.layout.block(emb.block()).range.clone();
            embedding.fill(rng, &mut params[range])?;
        }

        for dense in &self.mlp {
            let (fan_in, fan_out) = dense.dim();
            let range = self.layout.block(dense.kernel()).range.clone();
            Initializer::GlorotUniform { fan_in, fan_out }.fill(rng, &mut params[range])?;
        }

        let (fan_in, _) = self.output.dim();
        let range = self.layout.block(self.output.kernel()).range.clone();
        Initializer::LecunUniform { fan_in }.fill(rng, &mut params[range])?;

        Ok(params)
    }

    /// The blocks penalized by the L2 regularization and their factors.
    fn penalties(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        let mf = self.config.mf_regularization;
        let mlp_emb = self.config.mlp_reg_layers[0];

        let embeddings = [
            (self.mf_user.block(), mf),
            (self.mf_item.block(), mf),
            (self.mlp_user.block(), mlp_emb),
            (self.mlp_item.block(), mlp_emb),
        ];

        let kernels = self
            .mlp
            .iter()
            .zip(&self.config.mlp_reg_layers[1..])
            .map(|(dense, &reg)| (dense.kernel(), reg));

        embeddings
            .into_iter()
            .chain(kernels)
            .filter(|&(_, reg)| reg > 0.0)
    }
}

impl Model for NeuMf {
    type Cache = NeuMfCache;

    fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    fn forward(
        &self,
        params: &[f32],
        users: &[u32],
        items: &[u32],
    ) -> Result<(Array1<f32>, NeuMfCache)> {
        if users.len() != items.len() {
            return Err(MlErr::SizeMismatch {
                what: "users and items",
                got: items.len(),
                expected: users.len(),
            });
        }
        if params.len() != self.layout.len() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.layout.len(),
            });
        }

        let layout = &self.layout;

        let mf_user = self.mf_user.gather(layout, params, users)?;
        let mf_item = self.mf_item.gather(layout, params, items)?;
        let mf_vector = &mf_user * &mf_item;

        let mlp_user = self.mlp_user.gather(layout, params, users)?;
        let mlp_item = self.mlp_item.gather(layout, params, items)?;
        let mut h = concatenate(Axis(1), &[mlp_user.view(), mlp_item.view()])?;

        let mut mlp = Vec::with_capacity(self.mlp.len());
        for dense in &self.mlp {
            let (a, cache) = dense.forward(layout, params, h)?;
            mlp.push(cache);
            h = a;
        }

        let predict_vector = concatenate(Axis(1), &[mf_vector.view(), h.view()])?;
        let (logits, output) = self.output.forward(layout, params, predict_vector)?;

        let cache = NeuMfCache {
            users: users.to_vec(),
            items: items.to_vec(),
            mf_user,
            mf_item,
            mlp,
            output,
        };

        Ok((logits.remove_axis(Axis(1)), cache))
    }

    fn backward(
        &self,
        params: &[f32],
        cache: NeuMfCache,
        d_logits: ArrayView1<f32>,
        grad: &mut [f32],
    ) -> Result<()> {
        if grad.len() != self.layout.len() {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.layout.len(),
            });
        }

        let NeuMfCache {
            users,
            items,
            mf_user,
            mf_item,
            mlp,
            output,
        } = cache;
        let layout = &self.layout;

        let d = d_logits.to_owned().insert_axis(Axis(1));
        let d_predict = self.output.backward(layout, params, grad, output, d)?;
        let (d_mf, d_mlp) = d_predict.view().split_at(Axis(1), self.config.mf_dim);

        let mut d_h = d_mlp.to_owned();
        for (dense, cache) in self.mlp.iter().zip(mlp).rev() {
            d_h = dense.backward(layout, params, grad, cache, d_h)?;
        }

        let (d_mlp_user, d_mlp_item) = d_h.view().split_at(Axis(1), self.mlp_user.dim());
        self.mlp_user.scatter_add(layout, grad, &users, d_mlp_user)?;
        self.mlp_item.scatter_add(layout, grad, &items, d_mlp_item)?;

        let d_mf_user = &d_mf * &mf_item;
        let d_mf_item = &d_mf * &mf_user;
        self.mf_user
            .scatter_add(layout, grad, &users, d_mf_user.view())?;
        self.mf_item
            .scatter_add(layout, grad, &items, d_mf_item.view())?;

        Ok(())
    }

    fn regularize(&self, params: &[f32], grad: &mut [f32]) -> Result<()> {
        for (block, reg) in self.penalties() {
            let w = self.layout.view(block, params)?;
            self.layout.view_mut(block, grad)?.scaled_add(2.0 * reg, &w);
        }

        Ok(())
    }
}
