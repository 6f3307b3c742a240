/// Log-domain representation of probability zero.
///
/// A finite value is used instead of negative infinity so arithmetic on it
/// never produces NaN. Anything at or below it is treated as zero.
pub const LOG_ZERO: f32 = -1e30;

/// `ln(exp(a) + exp(b))`, with `LOG_ZERO` absorbed on either side.
pub fn log_sum_exp(log_prob_1: f32, log_prob_2: f32) -> f32 {
    if log_prob_1 <= LOG_ZERO {
        return log_prob_2;
    }
    if log_prob_2 <= LOG_ZERO {
        return log_prob_1;
    }

    if log_prob_1 > log_prob_2 {
        log_prob_1 + (log_prob_2 - log_prob_1).exp().ln_1p()
    } else {
        log_prob_2 + (log_prob_1 - log_prob_2).exp().ln_1p()
    }
}

/// `ln(p)` that maps zero (and underflow) to `LOG_ZERO`.
pub fn safe_log(prob: f32) -> f32 {
    if prob > 0.0 {
        prob.ln().max(LOG_ZERO)
    } else {
        LOG_ZERO
    }
}

/// Multiplication in log space. A zero operand keeps the product at zero.
pub fn log_mul(log_prob_1: f32, log_prob_2: f32) -> f32 {
    if log_prob_1 <= LOG_ZERO || log_prob_2 <= LOG_ZERO {
        LOG_ZERO
    } else {
        log_prob_1 + log_prob_2
    }
}
