//! Polak–Ribière nonlinear conjugate gradient.
//!
//! The driver is generic over the vector space ([`CgVector`]) so the same
//! iteration runs on a set of tensors ([`TensorSet`], doubling/halving line
//! search) or on a flattened parameter block (`Vec<f64>` through
//! [`ParameterBlock`], bracketing plus Brent line search).

use ipeps_core::{Index, Tensor};
use log::{debug, warn};

use crate::cost::CostFunctional;
use crate::error::{FullUpdateError, Result};
use crate::options::CgOptions;

/// Vector-space operations needed by the driver.
pub trait CgVector: Clone {
    fn dot(&self, other: &Self) -> Result<f64>;

    /// `a * self + b * other`.
    fn axpby(&self, a: f64, other: &Self, b: f64) -> Result<Self>;

    fn norm(&self) -> Result<f64> {
        Ok(self.dot(self)?.max(0.0).sqrt())
    }
}

impl CgVector for Vec<f64> {
    fn dot(&self, other: &Self) -> Result<f64> {
        if self.len() != other.len() {
            return Err(FullUpdateError::contract(
                "parameter block",
                format!("lengths {} and {} differ", self.len(), other.len()),
            ));
        }
        Ok(self.iter().zip(other).map(|(x, y)| x * y).sum())
    }

    fn axpby(&self, a: f64, other: &Self, b: f64) -> Result<Self> {
        if self.len() != other.len() {
            return Err(FullUpdateError::contract(
                "parameter block",
                format!("lengths {} and {} differ", self.len(), other.len()),
            ));
        }
        Ok(self.iter().zip(other).map(|(x, y)| a * x + b * y).collect())
    }
}

/// Several tensors treated as one vector.
#[derive(Debug, Clone)]
pub struct TensorSet(pub Vec<Tensor>);

impl TensorSet {
    pub fn into_inner(self) -> Vec<Tensor> {
        self.0
    }
}

impl CgVector for TensorSet {
    fn dot(&self, other: &Self) -> Result<f64> {
        if self.0.len() != other.0.len() {
            return Err(FullUpdateError::contract(
                "tensor set",
                format!("{} and {} tensors", self.0.len(), other.0.len()),
            ));
        }
        let mut sum = 0.0;
        for (a, b) in self.0.iter().zip(&other.0) {
            sum += a.inner_product(b)?;
        }
        Ok(sum)
    }

    fn axpby(&self, a: f64, other: &Self, b: f64) -> Result<Self> {
        if self.0.len() != other.0.len() {
            return Err(FullUpdateError::contract(
                "tensor set",
                format!("{} and {} tensors", self.0.len(), other.0.len()),
            ));
        }
        let out = self
            .0
            .iter()
            .zip(&other.0)
            .map(|(x, y)| x.axpby(a, y, b))
            .collect::<ipeps_core::Result<Vec<_>>>()?;
        Ok(TensorSet(out))
    }
}

/// Flattening map from a list of tensors to one contiguous parameter vector.
///
/// The leg order of every tensor is fixed at construction; flattening permutes
/// each tensor into that order first.
#[derive(Debug, Clone)]
pub struct ParameterBlock {
    layouts: Vec<Vec<Index>>,
    offsets: Vec<usize>,
    len: usize,
}

impl ParameterBlock {
    pub fn new(tensors: &[Tensor]) -> Self {
        let mut offsets = Vec::with_capacity(tensors.len());
        let mut len = 0;
        for t in tensors {
            offsets.push(len);
            len += t.len();
        }
        Self {
            layouts: tensors.iter().map(|t| t.indices().to_vec()).collect(),
            offsets,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flatten(&self, tensors: &[Tensor]) -> Result<Vec<f64>> {
        if tensors.len() != self.layouts.len() {
            return Err(FullUpdateError::contract(
                "parameter block",
                format!("expected {} tensors, got {}", self.layouts.len(), tensors.len()),
            ));
        }
        let mut out = Vec::with_capacity(self.len);
        for (t, legs) in tensors.iter().zip(&self.layouts) {
            out.extend_from_slice(t.permute_indices(legs)?.data());
        }
        Ok(out)
    }

    pub fn unflatten(&self, params: &[f64]) -> Result<Vec<Tensor>> {
        if params.len() != self.len {
            return Err(FullUpdateError::contract(
                "parameter block",
                format!("expected {} parameters, got {}", self.len, params.len()),
            ));
        }
        self.layouts
            .iter()
            .zip(&self.offsets)
            .map(|(legs, &start)| {
                let n: usize = legs.iter().map(Index::dim).product();
                Ok(Tensor::new(legs.clone(), params[start..start + n].to_vec())?)
            })
            .collect()
    }
}

/// Scalar function with gradient.
pub trait Objective<V> {
    fn value(&mut self, x: &V) -> Result<f64>;
    fn gradient(&mut self, x: &V) -> Result<V>;
}

impl<'a> Objective<TensorSet> for CostFunctional<'a> {
    fn value(&mut self, x: &TensorSet) -> Result<f64> {
        self.set_tensors(x.0.clone())?;
        CostFunctional::value(self)
    }

    fn gradient(&mut self, x: &TensorSet) -> Result<TensorSet> {
        self.set_tensors(x.0.clone())?;
        Ok(TensorSet(self.gradients()?))
    }
}

/// Cost functional seen through a [`ParameterBlock`].
#[derive(Debug)]
pub struct FlattenedObjective<'c, 'a> {
    cost: &'c mut CostFunctional<'a>,
    block: ParameterBlock,
}

impl<'c, 'a> FlattenedObjective<'c, 'a> {
    pub fn new(cost: &'c mut CostFunctional<'a>) -> Self {
        let block = ParameterBlock::new(cost.tensors());
        Self { cost, block }
    }

    pub fn block(&self) -> &ParameterBlock {
        &self.block
    }
}

impl Objective<Vec<f64>> for FlattenedObjective<'_, '_> {
    fn value(&mut self, x: &Vec<f64>) -> Result<f64> {
        self.cost.set_tensors(self.block.unflatten(x)?)?;
        CostFunctional::value(self.cost)
    }

    fn gradient(&mut self, x: &Vec<f64>) -> Result<Vec<f64>> {
        self.cost.set_tensors(self.block.unflatten(x)?)?;
        self.block.flatten(&self.cost.gradients()?)
    }
}

/// Line search used inside [`polak_ribiere`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearch {
    /// Try a step; double while the cost keeps dropping, halve while it does not.
    Backtracking,
    /// Golden-ratio bracketing followed by Brent minimization.
    Brent,
}

/// Result of [`polak_ribiere`].
#[derive(Debug, Clone)]
pub struct CgResult<V> {
    pub solution: V,
    pub initial_value: f64,
    pub value: f64,
    pub gradient_norm: f64,
    pub iterations: usize,
    pub function_calls: usize,
    pub gradient_calls: usize,
    pub converged: bool,
}

struct Counted<'o, O> {
    inner: &'o mut O,
    values: usize,
    gradients: usize,
}

impl<'o, O> Counted<'o, O> {
    fn value<V>(&mut self, x: &V) -> Result<f64>
    where
        O: Objective<V>,
    {
        self.values += 1;
        self.inner.value(x)
    }

    fn gradient<V>(&mut self, x: &V) -> Result<V>
    where
        O: Objective<V>,
    {
        self.gradients += 1;
        self.inner.gradient(x)
    }
}

/// Minimize `objective` from `x0`.
///
/// Stops when the relative improvement `|f_new − f_old| / |f_init|` drops
/// below `improvement_tol`, when `‖g‖ ≤ gradient_tol · max(1, ‖g₀‖)`, when
/// no step along steepest descent lowers the cost, or after `max_iter`
/// iterations. Only the last case reports `converged = false`.
pub fn polak_ribiere<V, O>(
    objective: &mut O,
    x0: V,
    options: &CgOptions,
    line_search: LineSearch,
) -> Result<CgResult<V>>
where
    V: CgVector,
    O: Objective<V>,
{
    let mut obj = Counted {
        inner: objective,
        values: 0,
        gradients: 0,
    };

    let mut x = x0;
    let mut f = obj.value(&x)?;
    let f_init = f;
    let f_scale = if f_init.abs() > f64::MIN_POSITIVE {
        f_init.abs()
    } else {
        1.0
    };
    let mut g = obj.gradient(&x)?;
    let mut gg = g.dot(&g)?;
    let g_tol = options.gradient_tol * gg.sqrt().max(1.0);
    let mut d = g.axpby(-1.0, &g, 0.0)?;
    let mut step = options.initial_step;
    let mut steepest = true;
    let mut converged = gg.sqrt() <= g_tol;
    let mut iterations = 0;

    while !converged && iterations < options.max_iter {
        iterations += 1;

        if !steepest && g.dot(&d)? >= 0.0 {
            debug!("cg iteration {iterations}: not a descent direction, restarting");
            d = g.axpby(-1.0, &g, 0.0)?;
            steepest = true;
        }

        let (alpha, f_new) = match line_search {
            LineSearch::Backtracking => backtrack(&mut obj, &x, &d, f, step, options)?,
            LineSearch::Brent => brent_along(&mut obj, &x, &d, f, step, options)?,
        };

        if alpha == 0.0 {
            if steepest {
                debug!("cg iteration {iterations}: no decrease along steepest descent");
                converged = true;
                break;
            }
            d = g.axpby(-1.0, &g, 0.0)?;
            steepest = true;
            continue;
        }
        step = alpha.abs();

        x = x.axpby(1.0, &d, alpha)?;
        let improvement = (f - f_new).abs() / f_scale;
        f = f_new;

        let g_new = obj.gradient(&x)?;
        let gg_new = g_new.dot(&g_new)?;
        debug!(
            "cg iteration {iterations}: f = {f:.6e}, |g| = {:.3e}, step = {alpha:.3e}",
            gg_new.sqrt()
        );

        if gg_new.sqrt() <= g_tol || improvement < options.improvement_tol {
            gg = gg_new;
            converged = true;
            break;
        }

        let gamma = (g_new.dot(&g_new.axpby(1.0, &g, -1.0)?)? / gg).max(0.0);
        d = g_new.axpby(-1.0, &d, gamma)?;
        steepest = gamma == 0.0;
        g = g_new;
        gg = gg_new;
    }

    if !converged {
        warn!(
            "conjugate gradient stopped after {iterations} iterations (|g| = {:.3e})",
            gg.sqrt()
        );
    }

    Ok(CgResult {
        solution: x,
        initial_value: f_init,
        value: f,
        gradient_norm: gg.sqrt(),
        iterations,
        function_calls: obj.values,
        gradient_calls: obj.gradients,
        converged,
    })
}

// ============================================================================
// Line searches
// ============================================================================

const MAX_DOUBLINGS: usize = 40;

/// Returns `(alpha, f(x + alpha d))`, or `(0, f0)` if no tried step lowers the cost.
fn backtrack<V, O>(
    obj: &mut Counted<'_, O>,
    x: &V,
    d: &V,
    f0: f64,
    step: f64,
    options: &CgOptions,
) -> Result<(f64, f64)>
where
    V: CgVector,
    O: Objective<V>,
{
    let mut t = step;
    let mut ft = obj.value(&x.axpby(1.0, d, t)?)?;

    if ft < f0 {
        for _ in 0..MAX_DOUBLINGS {
            let f2 = obj.value(&x.axpby(1.0, d, 2.0 * t)?)?;
            if f2 >= ft {
                break;
            }
            t *= 2.0;
            ft = f2;
        }
        return Ok((t, ft));
    }

    let t_min = options.line_search_tol * step;
    while t > t_min {
        t *= 0.5;
        ft = obj.value(&x.axpby(1.0, d, t)?)?;
        if ft < f0 {
            return Ok((t, ft));
        }
    }
    Ok((0.0, f0))
}

const GOLD: f64 = 1.618034;
const GLIMIT: f64 = 100.0;
const TINY: f64 = 1.0e-20;
const CGOLD: f64 = 0.381_966_0;
const MAX_BRACKET: usize = 60;
const MAX_BRENT: usize = 100;

fn sign(a: f64, b: f64) -> f64 {
    if b >= 0.0 {
        a.abs()
    } else {
        -a.abs()
    }
}

/// Bracketing plus Brent along `d`; returns the minimizer if it lowers the cost.
fn brent_along<V, O>(
    obj: &mut Counted<'_, O>,
    x: &V,
    d: &V,
    f0: f64,
    step: f64,
    options: &CgOptions,
) -> Result<(f64, f64)>
where
    V: CgVector,
    O: Objective<V>,
{
    let mut phi = |t: f64| -> Result<f64> {
        if t == 0.0 {
            return Ok(f0);
        }
        obj.value(&x.axpby(1.0, d, t)?)
    };
    let (a, b, c) = bracket(&mut phi, 0.0, step)?;
    let (t, ft) = brent(&mut phi, a, b, c, options.line_search_tol)?;
    if ft < f0 {
        Ok((t, ft))
    } else {
        Ok((0.0, f0))
    }
}

/// Golden-ratio expansion with parabolic extrapolation until `f(b) ≤ f(a), f(c)`.
fn bracket<F>(phi: &mut F, a0: f64, b0: f64) -> Result<(f64, f64, f64)>
where
    F: FnMut(f64) -> Result<f64>,
{
    let (mut ax, mut bx) = (a0, b0);
    let (mut fa, mut fb) = (phi(ax)?, phi(bx)?);
    if fb > fa {
        std::mem::swap(&mut ax, &mut bx);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut cx = bx + GOLD * (bx - ax);
    let mut fc = phi(cx)?;

    for _ in 0..MAX_BRACKET {
        if fb <= fc {
            break;
        }
        let r = (bx - ax) * (fb - fc);
        let q = (bx - cx) * (fb - fa);
        let mut u = bx - ((bx - cx) * q - (bx - ax) * r) / (2.0 * sign((q - r).abs().max(TINY), q - r));
        let ulim = bx + GLIMIT * (cx - bx);
        let mut fu;
        if (bx - u) * (u - cx) > 0.0 {
            fu = phi(u)?;
            if fu < fc {
                return Ok((bx, u, cx));
            } else if fu > fb {
                return Ok((ax, bx, u));
            }
            u = cx + GOLD * (cx - bx);
            fu = phi(u)?;
        } else if (cx - u) * (u - ulim) > 0.0 {
            fu = phi(u)?;
            if fu < fc {
                bx = cx;
                cx = u;
                u = cx + GOLD * (cx - bx);
                fb = fc;
                fc = fu;
                fu = phi(u)?;
            }
        } else if (u - ulim) * (ulim - cx) >= 0.0 {
            u = ulim;
            fu = phi(u)?;
        } else {
            u = cx + GOLD * (cx - bx);
            fu = phi(u)?;
        }
        ax = bx;
        bx = cx;
        cx = u;
        fa = fb;
        fb = fc;
        fc = fu;
    }
    Ok((ax, bx, cx))
}

/// Brent minimization inside the bracket `(ax, bx, cx)`.
fn brent<F>(phi: &mut F, ax: f64, bx: f64, cx: f64, tol: f64) -> Result<(f64, f64)>
where
    F: FnMut(f64) -> Result<f64>,
{
    let zeps = f64::EPSILON * 1.0e-3;
    let mut a = ax.min(cx);
    let mut b = ax.max(cx);
    let (mut x, mut w, mut v) = (bx, bx, bx);
    let mut fx = phi(x)?;
    let (mut fw, mut fv) = (fx, fx);
    let (mut d, mut e) = (0.0f64, 0.0f64);

    for _ in 0..MAX_BRENT {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + zeps;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            return Ok((x, fx));
        }
        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let etemp = e;
            e = d;
            if !(p.abs() >= (0.5 * q * etemp).abs() || p <= q * (a - x) || p >= q * (b - x)) {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = sign(tol1, xm - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= xm { a - x } else { b - x };
            d = CGOLD * e;
        }
        let u = if d.abs() >= tol1 { x + d } else { x + sign(tol1, d) };
        let fu = phi(u)?;
        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    debug!("brent line search hit its iteration cap");
    Ok((x, fx))
}
