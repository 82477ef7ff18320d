//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use derivative::Derivative;
pub use futures::{
    future::{BoxFuture, FutureExt as _},
    stream::{self, BoxStream, Stream, StreamExt as _, TryStreamExt as _},
};
pub use image::{imageops::FilterType, RgbImage};
pub use indexmap::IndexSet;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use ndarray::{Array3, ArrayD};
pub use noisy_float::prelude::*;
pub use once_cell::unsync::OnceCell;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::{Borrow, Cow},
    cmp::Ordering,
    fmt::{self, Debug},
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        atomic::{self, AtomicBool},
        Arc,
    },
    time::{Duration, Instant},
};
pub use tch::{Device, IndexOp as _, Kind, Tensor};
pub use tch_tensor_like::TensorLike;
