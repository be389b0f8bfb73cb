//! Value resolution over a property's opinion stack.
//!
//! Opinions are visited strongest first. In each layer a value block at
//! the default slot ends resolution with no value. Otherwise time samples
//! and then a spline win when time-varying sources are being considered
//! and no stronger animation block suppressed them. An animation block
//! default suppresses time-varying sources from here on down but lets a
//! plain default (here or weaker) through.

use crate::sdf::{LayerHandle, LayerOffset};
use crate::util::{Path, TimeCode};

/// Kind of opinion a value resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResolveSource {
    #[default]
    None,
    Default,
    TimeSamples,
    Spline,
    /// Never produced; value clips are not supported.
    ValueClips,
}

/// One opinion of a property: the spec path in a layer plus the offset
/// mapping that layer's time to stage time.
#[derive(Clone, Debug)]
pub struct PropertyOpinion {
    pub layer: LayerHandle,
    pub path: Path,
    pub offset: LayerOffset,
}

/// Where a property's value comes from.
#[derive(Clone, Debug, Default)]
pub struct ResolveInfo {
    source: ResolveSource,
    layer: Option<LayerHandle>,
    path: Path,
    offset: LayerOffset,
    value_is_blocked: bool,
    has_authored_value_opinion: bool,
}

impl ResolveInfo {
    pub fn source(&self) -> ResolveSource {
        self.source
    }

    /// Layer holding the winning opinion.
    pub fn layer(&self) -> Option<&LayerHandle> {
        self.layer.as_ref()
    }

    /// Spec path of the winning opinion.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layer-to-stage time offset of the winning opinion.
    pub fn offset(&self) -> LayerOffset {
        self.offset
    }

    /// Check if a value block ended resolution.
    #[inline]
    pub fn value_is_blocked(&self) -> bool {
        self.value_is_blocked
    }

    /// Check if any layer holds a value opinion, blocks included.
    #[inline]
    pub fn has_authored_value_opinion(&self) -> bool {
        self.has_authored_value_opinion
    }

    /// Check if the property resolved to an authored value.
    #[inline]
    pub fn has_value(&self) -> bool {
        self.source != ResolveSource::None
    }

    /// Map a stage time into the winning layer's time.
    #[inline]
    pub fn layer_time(&self, stage_time: f64) -> f64 {
        self.offset.apply_inverse(stage_time)
    }

    fn found(source: ResolveSource, opinion: &PropertyOpinion) -> Self {
        Self {
            source,
            layer: Some(opinion.layer.clone()),
            path: opinion.path.clone(),
            offset: opinion.offset,
            value_is_blocked: false,
            has_authored_value_opinion: true,
        }
    }
}

/// Resolve the source of a property's value.
///
/// `time` of `None` considers every source kind; the default time considers
/// only defaults; a numeric time considers time-varying sources first.
pub fn resolve(opinions: &[PropertyOpinion], time: Option<TimeCode>) -> ResolveInfo {
    let time_varying = time.map_or(true, |t| !t.is_default());
    let mut animation_blocked = false;
    let mut authored = false;

    for opinion in opinions {
        let default = opinion.layer.default_value(&opinion.path);
        if default.as_ref().is_some_and(|v| v.is_value_block()) {
            return ResolveInfo {
                layer: Some(opinion.layer.clone()),
                path: opinion.path.clone(),
                offset: opinion.offset,
                value_is_blocked: true,
                has_authored_value_opinion: true,
                ..Default::default()
            };
        }
        if time_varying && !animation_blocked {
            if opinion.layer.time_samples(&opinion.path).is_some_and(|s| !s.is_empty()) {
                return ResolveInfo::found(ResolveSource::TimeSamples, opinion);
            }
            if opinion.layer.spline(&opinion.path).is_some_and(|s| s.is_time_varying()) {
                return ResolveInfo::found(ResolveSource::Spline, opinion);
            }
        }
        match default {
            Some(v) if v.is_animation_block() => {
                animation_blocked = true;
                authored = true;
            }
            Some(_) => return ResolveInfo::found(ResolveSource::Default, opinion),
            None => {}
        }
    }

    ResolveInfo {
        has_authored_value_opinion: authored,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sdf::{Layer, TimeSamples};
    use crate::util::Value;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    fn opinion(layer: &LayerHandle) -> PropertyOpinion {
        PropertyOpinion {
            layer: layer.clone(),
            path: p("/Prim.c"),
            offset: LayerOffset::identity(),
        }
    }

    fn layer_with_attr(tag: &str) -> LayerHandle {
        let layer = Layer::anonymous(tag);
        layer.create_attribute_spec(&p("/Prim.c"), "double").expect("attr");
        layer
    }

    #[test]
    fn test_animation_block_lets_weaker_default_through() {
        let strong = layer_with_attr("strong");
        let weak = layer_with_attr("weak");
        strong.set_default_value(&p("/Prim.c"), Value::AnimationBlock).expect("block");
        weak.set_default_value(&p("/Prim.c"), Value::Double(1.0)).expect("default");
        weak.set_time_samples(
            &p("/Prim.c"),
            TimeSamples::from_pairs([(0.0, Value::Double(456.0)), (1.0, Value::Double(789.0))]),
        )
        .expect("samples");

        let stack = [opinion(&strong), opinion(&weak)];
        let info = resolve(&stack, Some(TimeCode::new(1.0)));
        assert_eq!(info.source(), ResolveSource::Default);
        assert!(Arc::ptr_eq(info.layer().expect("layer"), &weak));
        assert_eq!(resolve(&stack, None).source(), ResolveSource::Default);
    }

    #[test]
    fn test_same_layer_samples_beat_animation_block() {
        let layer = layer_with_attr("only");
        layer.set_default_value(&p("/Prim.c"), Value::AnimationBlock).expect("block");
        layer.set_time_sample(&p("/Prim.c"), 0.0, Value::Double(2.0)).expect("sample");
        let stack = [opinion(&layer)];
        assert_eq!(resolve(&stack, None).source(), ResolveSource::TimeSamples);
        // the default slot only holds the animation block
        assert_eq!(resolve(&stack, Some(TimeCode::default_time())).source(), ResolveSource::None);
    }

    #[test]
    fn test_only_animation_block_resolves_to_none() {
        let layer = layer_with_attr("only");
        layer.set_default_value(&p("/Prim.c"), Value::AnimationBlock).expect("block");
        let info = resolve(&[opinion(&layer)], None);
        assert_eq!(info.source(), ResolveSource::None);
        assert!(!info.value_is_blocked());
        assert!(info.has_authored_value_opinion());
    }

    #[test]
    fn test_value_block_hides_weaker_and_same_layer() {
        let strong = layer_with_attr("strong");
        let weak = layer_with_attr("weak");
        strong.set_default_value(&p("/Prim.c"), Value::ValueBlock).expect("block");
        strong.set_time_sample(&p("/Prim.c"), 0.0, Value::Double(3.0)).expect("sample");
        weak.set_default_value(&p("/Prim.c"), Value::Double(1.0)).expect("default");
        let info = resolve(&[opinion(&strong), opinion(&weak)], Some(TimeCode::new(0.0)));
        assert_eq!(info.source(), ResolveSource::None);
        assert!(info.value_is_blocked());
    }
}
