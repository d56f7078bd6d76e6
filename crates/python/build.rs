fn main() {
    // exposes cfg(Py_3_N) for the interpreter pyo3 links against
    pyo3_build_config::use_pyo3_cfgs();
}
