//! Composed attributes: value queries and authoring.

use half::f16;
use tracing::trace;

use super::interpolation::sample_at;
use super::resolve::{resolve, PropertyOpinion, ResolveInfo, ResolveSource};
use super::Stage;
use crate::sdf::{fields, LayerHandle, Specifier};
use crate::ts::{EvalMode, Spline};
use crate::util::{InterpolationType, Path, Result, TimeCode, Value};

/// Handle to an attribute of a [`Stage`].
#[derive(Clone, Debug)]
pub struct Attribute {
    stage: Stage,
    path: Path,
}

impl Attribute {
    pub(crate) fn new(stage: Stage, path: Path) -> Self {
        Self { stage, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn prim_path(&self) -> Path {
        self.path.prim_path()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Attribute specs backing this attribute, strongest first.
    pub fn opinions(&self) -> Vec<PropertyOpinion> {
        let name = self.name();
        self.stage
            .prim_index(&self.prim_path())
            .map(|index| {
                index
                    .prim_stack()
                    .iter()
                    .map(|entry| PropertyOpinion {
                        layer: entry.layer.clone(),
                        path: entry.path.append_property(name),
                        offset: entry.offset,
                    })
                    .filter(|o| o.layer.has_spec(&o.path))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Strongest authored value type name.
    pub fn type_name(&self) -> Option<String> {
        self.opinions()
            .iter()
            .find_map(|o| o.layer.type_name(&o.path))
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve info considering every source kind.
    pub fn resolve_info(&self) -> ResolveInfo {
        resolve(&self.opinions(), None)
    }

    /// Resolve info at `time`.
    pub fn resolve_info_at(&self, time: TimeCode) -> ResolveInfo {
        resolve(&self.opinions(), Some(time))
    }

    /// Value at the default time.
    pub fn get(&self) -> Option<Value> {
        self.get_at(TimeCode::default_time())
    }

    /// Value at `time`.
    pub fn get_at(&self, time: TimeCode) -> Option<Value> {
        let info = self.resolve_info_at(time);
        value_from(&info, time, self.stage.interpolation_type(), self.type_name().as_deref())
    }

    /// The composed default-slot value, ignoring time-varying sources.
    pub fn get_default(&self) -> Option<Value> {
        self.get()
    }

    /// The winning spline mapped to stage time, if a spline wins.
    pub fn spline(&self) -> Option<Spline> {
        let info = self.resolve_info();
        if info.source() != ResolveSource::Spline {
            return None;
        }
        let layer = info.layer()?;
        Some(layer.spline(info.path())?.with_offset(&info.offset()))
    }

    /// Sample (or knot) times of the winning time-varying opinion, in stage
    /// time.
    pub fn time_samples(&self) -> Vec<f64> {
        stage_times(&self.resolve_info())
    }

    /// Sample times within `[start, end]`.
    pub fn time_samples_in_interval(&self, start: f64, end: f64) -> Vec<f64> {
        self.time_samples()
            .into_iter()
            .filter(|t| *t >= start && *t <= end)
            .collect()
    }

    pub fn num_time_samples(&self) -> usize {
        self.time_samples().len()
    }

    /// Samples bracketing `time`; both equal at a sample time or outside
    /// the sampled range.
    pub fn bracketing_time_samples(&self, time: f64) -> Option<(f64, f64)> {
        bracketing(&self.time_samples(), time)
    }

    /// Latest sample time strictly before `time`.
    pub fn previous_time_sample(&self, time: f64) -> Option<f64> {
        self.time_samples().into_iter().filter(|t| *t < time).last()
    }

    /// Check if the value may differ over time.
    pub fn value_might_be_time_varying(&self) -> bool {
        let info = self.resolve_info();
        match info.source() {
            ResolveSource::TimeSamples => stage_times(&info).len() > 1,
            ResolveSource::Spline => true,
            _ => false,
        }
    }

    /// Check if some source resolves to a value.
    pub fn has_value(&self) -> bool {
        self.resolve_info().has_value()
    }

    /// Check if an unblocked value opinion is authored anywhere.
    pub fn has_authored_value(&self) -> bool {
        let info = self.resolve_info();
        info.has_authored_value_opinion() && !info.value_is_blocked()
    }

    /// A query caching this attribute's resolution.
    pub fn query(&self) -> AttributeQuery {
        AttributeQuery::new(self)
    }

    // ========================================================================
    // Authoring
    // ========================================================================

    /// Author the default value in the edit target.
    pub fn set(&self, value: Value) -> Result<()> {
        self.set_at(TimeCode::default_time(), value)
    }

    /// Author a value at `time` (the default slot for the default time).
    pub fn set_at(&self, time: TimeCode, value: Value) -> Result<()> {
        let type_name = value.type_name();
        let target = self.stage.edit_target();
        self.ensure_spec(target.layer(), type_name)?;
        if time.is_default() {
            target.layer().set_default_value(&self.path, value)
        } else {
            let layer_time = target.offset().apply_inverse(time.value());
            trace!(path = %self.path, time = time.value(), layer_time, "authoring time sample");
            target.layer().set_time_sample(&self.path, layer_time, value)
        }
    }

    /// Block the value in the edit target, removing its samples and spline.
    pub fn block(&self) -> Result<()> {
        let target = self.stage.edit_target();
        let layer = target.layer();
        self.ensure_spec(layer, "")?;
        layer.erase_field(&self.path, fields::TIME_SAMPLES)?;
        layer.erase_field(&self.path, fields::SPLINE)?;
        layer.set_default_value(&self.path, Value::ValueBlock)
    }

    /// Remove every value opinion from the edit target. Returns whether
    /// anything was removed.
    pub fn clear(&self) -> Result<bool> {
        let target = self.stage.edit_target();
        let layer = target.layer();
        if !layer.has_spec(&self.path) {
            return Ok(false);
        }
        let mut removed = false;
        for field in [fields::DEFAULT, fields::TIME_SAMPLES, fields::SPLINE] {
            removed |= layer.erase_field(&self.path, field)?;
        }
        Ok(removed)
    }

    /// Author a spline given in stage time.
    pub fn set_spline(&self, spline: &Spline) -> Result<()> {
        let target = self.stage.edit_target();
        self.ensure_spec(target.layer(), "double")?;
        target
            .layer()
            .set_spline(&self.path, spline.with_offset(&target.offset().inverse()))
    }

    fn ensure_spec(&self, layer: &LayerHandle, type_name: &str) -> Result<()> {
        if layer.has_spec(&self.path) {
            return Ok(());
        }
        let prim = self.prim_path();
        if !layer.has_spec(&prim) {
            layer.create_prim_spec(&prim, Specifier::Over)?;
        }
        let composed = self.type_name();
        layer.create_attribute_spec(&self.path, composed.as_deref().unwrap_or(type_name))
    }
}

/// An attribute with its resolution cached.
///
/// Results go stale when the stage changes; build a new query then.
#[derive(Clone, Debug)]
pub struct AttributeQuery {
    attribute: Attribute,
    info: ResolveInfo,
    default_info: ResolveInfo,
    type_name: Option<String>,
}

impl AttributeQuery {
    pub fn new(attribute: &Attribute) -> Self {
        let opinions = attribute.opinions();
        Self {
            attribute: attribute.clone(),
            info: resolve(&opinions, None),
            default_info: resolve(&opinions, Some(TimeCode::default_time())),
            type_name: attribute.type_name(),
        }
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }

    pub fn resolve_info(&self) -> &ResolveInfo {
        &self.info
    }

    pub fn get(&self) -> Option<Value> {
        self.get_at(TimeCode::default_time())
    }

    pub fn get_at(&self, time: TimeCode) -> Option<Value> {
        let info = if time.is_default() { &self.default_info } else { &self.info };
        value_from(
            info,
            time,
            self.attribute.stage.interpolation_type(),
            self.type_name.as_deref(),
        )
    }

    pub fn time_samples(&self) -> Vec<f64> {
        stage_times(&self.info)
    }

    pub fn bracketing_time_samples(&self, time: f64) -> Option<(f64, f64)> {
        bracketing(&self.time_samples(), time)
    }

    pub fn value_might_be_time_varying(&self) -> bool {
        match self.info.source() {
            ResolveSource::TimeSamples => self.time_samples().len() > 1,
            ResolveSource::Spline => true,
            _ => false,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Produce the value of a resolved opinion at stage time `time`.
fn value_from(
    info: &ResolveInfo,
    time: TimeCode,
    interpolation: InterpolationType,
    type_name: Option<&str>,
) -> Option<Value> {
    let layer = info.layer()?;
    match info.source() {
        ResolveSource::None | ResolveSource::ValueClips => None,
        ResolveSource::Default => layer
            .default_value(info.path())
            .filter(|v| !v.is_value_block() && !v.is_animation_block()),
        ResolveSource::TimeSamples => {
            let samples = layer.time_samples(info.path())?;
            let layer_time = if time.is_numeric() {
                info.layer_time(time.value())
            } else {
                samples.at(0)?.0
            };
            sample_at(&samples, layer_time, time.is_pre_time(), interpolation)
        }
        ResolveSource::Spline => {
            let spline = layer.spline(info.path())?;
            let layer_time = if time.is_numeric() {
                info.layer_time(time.value())
            } else {
                spline.knots().first()?.time
            };
            let mode = match (time.is_pre_time(), interpolation.is_held()) {
                (false, false) => EvalMode::Value,
                (true, false) => EvalMode::PreValue,
                (false, true) => EvalMode::Held,
                (true, true) => EvalMode::PreValueHeld,
            };
            let value = spline.evaluate(layer_time, mode)?;
            Some(match type_name {
                Some("float") => Value::Float(value as f32),
                Some("half") => Value::Half(f16::from_f64(value)),
                _ => Value::Double(value),
            })
        }
    }
}

/// Sample or knot times of a time-varying opinion, mapped to stage time.
fn stage_times(info: &ResolveInfo) -> Vec<f64> {
    let Some(layer) = info.layer() else {
        return Vec::new();
    };
    let mut times: Vec<f64> = match info.source() {
        ResolveSource::TimeSamples => layer
            .time_samples(info.path())
            .map(|s| s.times())
            .unwrap_or_default(),
        ResolveSource::Spline => layer
            .spline(info.path())
            .map(|s| s.knot_times())
            .unwrap_or_default(),
        _ => return Vec::new(),
    };
    let offset = info.offset();
    for t in times.iter_mut() {
        *t = offset.apply(*t);
    }
    times.sort_by(|a, b| a.total_cmp(b));
    times
}

fn bracketing(times: &[f64], time: f64) -> Option<(f64, f64)> {
    let first = *times.first()?;
    let last = *times.last()?;
    if time <= first {
        return Some((first, first));
    }
    if time >= last {
        return Some((last, last));
    }
    let hi = times.partition_point(|t| *t < time);
    if times[hi] == time {
        Some((time, time))
    } else {
        Some((times[hi - 1], times[hi]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{LayerOffset, LayerRegistry, TimeSamples};
    use crate::ts::{Interpolation, Knot};

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    fn stage_with_sublayer(offset: LayerOffset) -> (Stage, LayerHandle) {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let anim = registry.create("anim.usda");
        root.set_sublayer_paths(vec!["anim.usda".into()]).expect("sublayers");
        root.set_sublayer_offset(offset, 0).expect("offset");
        anim.create_prim_spec(&p("/Ball"), Specifier::Def).expect("prim");
        anim.create_attribute_spec(&p("/Ball.y"), "double").expect("attr");
        (Stage::open(&registry, &root).expect("stage"), anim)
    }

    #[test]
    fn test_time_samples_through_layer_offset() {
        let (stage, anim) = stage_with_sublayer(LayerOffset::new(10.0, 2.0));
        anim.set_time_samples(
            &p("/Ball.y"),
            TimeSamples::from_pairs([(0.0, Value::Double(0.0)), (10.0, Value::Double(10.0))]),
        )
        .expect("samples");
        let attr = stage.attribute_at_path(&p("/Ball.y")).expect("attr");

        // stage time = 10 + 2 * layer time
        assert_eq!(attr.time_samples(), vec![10.0, 30.0]);
        assert_eq!(attr.get_at(TimeCode::new(20.0)), Some(Value::Double(5.0)));
        assert_eq!(attr.get_at(TimeCode::new(0.0)), Some(Value::Double(0.0)));
        assert_eq!(attr.bracketing_time_samples(15.0), Some((10.0, 30.0)));
        assert_eq!(attr.previous_time_sample(30.0), Some(10.0));
        assert_eq!(attr.time_samples_in_interval(0.0, 20.0), vec![10.0]);
        assert!(attr.value_might_be_time_varying());
        assert_eq!(attr.get(), None);

        stage.set_interpolation_type(InterpolationType::Held);
        assert_eq!(attr.get_at(TimeCode::new(29.0)), Some(Value::Double(0.0)));
        assert_eq!(attr.query().get_at(TimeCode::new(29.0)), Some(Value::Double(0.0)));
    }

    #[test]
    fn test_authoring_maps_stage_time_into_target() {
        let (stage, anim) = stage_with_sublayer(LayerOffset::new(10.0, 1.0));
        stage.set_edit_target(&anim).expect("target");
        let attr = stage.attribute_at_path(&p("/Ball.y")).expect("attr");

        attr.set_at(TimeCode::new(15.0), Value::Double(1.5)).expect("sample");
        assert_eq!(
            anim.time_samples(&p("/Ball.y")).expect("samples").times(),
            vec![5.0]
        );
        assert_eq!(attr.get_at(TimeCode::new(15.0)), Some(Value::Double(1.5)));

        attr.set(Value::Double(7.0)).expect("default");
        assert_eq!(attr.get(), Some(Value::Double(7.0)));

        attr.block().expect("block");
        assert!(attr.resolve_info().value_is_blocked());
        assert!(!attr.has_value());
        assert_eq!(attr.num_time_samples(), 0);

        assert!(attr.clear().expect("clear"));
        assert!(!attr.has_authored_value());
    }

    #[test]
    fn test_spline_values_in_stage_time() {
        let (stage, anim) = stage_with_sublayer(LayerOffset::new(100.0, 1.0));
        stage.set_edit_target(&anim).expect("target");
        let attr = stage.attribute_at_path(&p("/Ball.y")).expect("attr");
        let spline = Spline::from_knots([
            Knot::new(100.0, 0.0).with_interp(Interpolation::Linear),
            Knot::new(110.0, 10.0),
        ]);
        attr.set_spline(&spline).expect("spline");

        assert_eq!(
            anim.spline(&p("/Ball.y")).expect("authored").knot_times(),
            vec![0.0, 10.0]
        );
        assert_eq!(attr.resolve_info().source(), ResolveSource::Spline);
        assert_eq!(attr.time_samples(), vec![100.0, 110.0]);
        assert_eq!(attr.get_at(TimeCode::new(105.0)), Some(Value::Double(5.0)));
        assert_eq!(attr.spline().expect("spline").knot_times(), vec![100.0, 110.0]);
    }
}
