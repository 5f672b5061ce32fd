use crate::core::tasks::{Context, DisjointSlice, Scheduler};
use crate::ecs::ComponentManager;
use crate::scene::components::{ExpressionComponent, MeshComponent};

/// Advance procedural expressions (blinking) and update expression weights.
pub(crate) fn run_expression_system<'env>(
    scheduler: &Scheduler,
    ctx: &Context<'env>,
    group_size: u32,
    expressions: &'env mut ComponentManager<ExpressionComponent>,
    dt: f32,
) {
    let rows = DisjointSlice::new(expressions.components_mut());
    scheduler.dispatch(ctx, rows.len() as u32, group_size, move |args| {
        // SAFETY: one job per row.
        let component = unsafe { rows.get_mut(args.job_index as usize) };
        blink(component, dt);
    });
}

/// Blinks come in bursts of `blink_count` at the start of every `1 / blink_frequency` seconds.
/// The lids close and open linearly over `blink_length` seconds.
fn blink(component: &mut ExpressionComponent, dt: f32) {
    let Some(index) = component.blink.filter(|&index| index < component.expressions.len()) else {
        return;
    };
    if component.blink_frequency <= 0.0 || component.blink_length <= 0.0 {
        return;
    }

    let period = 1.0 / component.blink_frequency;
    component.blink_timer += dt;
    if component.blink_timer >= period {
        component.blink_timer %= period;
    }

    let burst = component.blink_length * component.blink_count as f32;
    let weight = if component.blink_timer < burst {
        let phase = (component.blink_timer % component.blink_length) / component.blink_length;
        1.0 - (2.0 * phase - 1.0).abs()
    } else {
        0.0
    };
    component.expressions[index].set_weight(weight);
}

/// Write the weights of changed expressions into their bound morph targets.
pub(crate) fn apply_expressions(
    expressions: &mut ComponentManager<ExpressionComponent>,
    meshes: &mut ComponentManager<MeshComponent>,
) {
    for component in expressions.components_mut() {
        for expression in &mut component.expressions {
            if !expression.take_dirty() {
                continue;
            }
            for binding in &expression.morph_target_bindings {
                let morph = meshes
                    .get_mut(binding.mesh)
                    .and_then(|mesh| mesh.morph_targets.get_mut(binding.index));
                if let Some(morph) = morph {
                    morph.weight = expression.weight * binding.weight;
                }
            }
        }
    }
}
