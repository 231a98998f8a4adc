use scalargrad::{central_diff, RcValue, EPSILON};

fn main() {
    env_logger::init();

    // f = tanh(2x + 3) at x = 1
    let x = RcValue::new("x", 1.);
    let two = RcValue::new("2", 2.);
    let three = RcValue::new("3", 3.);
    let y = &two * &x;
    let z = &y + &three;
    let f = z.tanh();

    f.backward();

    let got = x.grad();
    let want = central_diff(|xx| (2. * xx + 3.).tanh(), 1., EPSILON);
    println!("f({}) = {}", f.label(), f.data());
    println!(
        "x.grad (backprop)={:.6}, (numerical)={:.6}, err={:.6}",
        got,
        want,
        (got - want).abs()
    );
}
